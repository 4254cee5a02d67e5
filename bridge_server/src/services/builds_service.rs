//! Downstream builds-service client (GraphQL over HTTP).
//!
//! Three operations: submit a job, fetch a job's status, fetch the
//! authenticated user (used only to validate freshly obtained tokens).

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::models::error::BridgeError;
use crate::models::job::{JobStatus, Visibility};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SUBMIT_QUERY: &str = "\
mutation submit($manifest: String!, $tags: [String!], $note: String, $secrets: Boolean, $visibility: Visibility!) {
    submit(manifest: $manifest, tags: $tags, note: $note, secrets: $secrets, visibility: $visibility) {
        id
        owner { canonicalName }
    }
}";

const JOB_QUERY: &str = "\
query job($id: Int!) {
    job(id: $id) { status }
}";

const ME_QUERY: &str = "\
query me {
    me { canonicalName }
}";

/// A freshly submitted job.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub id: i64,
    /// Owner canonical name, used to build the job detail URL.
    pub owner: String,
}

#[derive(Debug, Clone)]
pub struct BuildsUser {
    pub canonical_name: String,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

/// Client scoped to one installation's access token (a snapshot taken at
/// orchestration start; a concurrent refresh does not retroactively change
/// an already-running monitor).
#[derive(Clone)]
pub struct BuildsClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl BuildsClient {
    pub fn new(endpoint: &str, token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("buildbridge")
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Web page for a job, shown as the commit status target URL.
    pub fn job_url(&self, owner: &str, job_id: i64) -> String {
        format!("{}/{}/job/{}", self.endpoint, owner, job_id)
    }

    async fn execute(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, BridgeError> {
        let resp = self
            .http
            .post(format!("{}/query", self.endpoint))
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        // An insufficient or revoked OAuth grant is the user's to fix.
        if resp.status() == StatusCode::FORBIDDEN {
            return Err(BridgeError::user(
                "builds service refused the request (insufficient OAuth grant?)",
            ));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::internal(format!(
                "builds service returned {status}: {body}"
            )));
        }

        let parsed: GraphqlResponse = resp.json().await?;
        if let Some(err) = parsed.errors.first() {
            return Err(BridgeError::internal(format!(
                "builds service error: {}",
                err.message
            )));
        }
        parsed
            .data
            .ok_or_else(|| BridgeError::internal("builds service returned no data"))
    }

    pub async fn submit_job(
        &self,
        manifest: &str,
        tags: &[String],
        note: &str,
        secrets: Option<bool>,
        visibility: Visibility,
    ) -> Result<SubmittedJob, BridgeError> {
        let data = self
            .execute(
                SUBMIT_QUERY,
                json!({
                    "manifest": manifest,
                    "tags": tags,
                    "note": note,
                    "secrets": secrets,
                    "visibility": visibility.as_str(),
                }),
            )
            .await
            .map_err(|err| match err {
                BridgeError::User(msg) => {
                    BridgeError::User(format!("failed to submit job: {msg}"))
                }
                other => other,
            })?;

        let job = &data["submit"];
        let id = job["id"]
            .as_i64()
            .ok_or_else(|| BridgeError::internal("malformed submit response: missing job id"))?;
        let owner = job["owner"]["canonicalName"]
            .as_str()
            .ok_or_else(|| BridgeError::internal("malformed submit response: missing owner"))?
            .to_string();

        Ok(SubmittedJob { id, owner })
    }

    pub async fn fetch_job_status(&self, job_id: i64) -> Result<JobStatus, BridgeError> {
        let data = self.execute(JOB_QUERY, json!({ "id": job_id })).await?;
        let status = data["job"]["status"].clone();
        serde_json::from_value(status)
            .map_err(|e| BridgeError::internal(format!("malformed job status: {e}")))
    }

    /// Fetch the authenticated user; a token that cannot do this is invalid.
    pub async fn fetch_user(&self) -> Result<BuildsUser, BridgeError> {
        let data = self.execute(ME_QUERY, json!({})).await?;
        let canonical_name = data["me"]["canonicalName"]
            .as_str()
            .ok_or_else(|| BridgeError::internal("malformed me response"))?
            .to_string();
        Ok(BuildsUser { canonical_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_url_layout() {
        let client = BuildsClient::new("https://builds.example.org/", "token");
        assert_eq!(
            client.job_url("~alice", 1234),
            "https://builds.example.org/~alice/job/1234"
        );
    }

    #[test]
    fn graphql_response_with_errors() {
        let raw = r#"{"data": null, "errors": [{"message": "no such job"}]}"#;
        let parsed: GraphqlResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].message, "no such job");
    }

    #[test]
    fn job_status_parses_from_submit_shaped_data() {
        let data: serde_json::Value =
            serde_json::from_str(r#"{"job": {"status": "QUEUED"}}"#).unwrap();
        let status: JobStatus = serde_json::from_value(data["job"]["status"].clone()).unwrap();
        assert_eq!(status, JobStatus::Queued);
    }
}
