//! Typed GitHub webhook events.
//!
//! The event-type header plus JSON payload decode into one closed enum, so
//! dispatch is an exhaustive match with an explicit arm for event types the
//! bridge does not recognize. Payload structs cover only the fields the
//! bridge reads.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    pub clone_url: String,
    pub html_url: String,
    pub owner: Account,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub name: String,
}

/// Head commit metadata (message plus author).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRef {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PingPayload {
    pub zen: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstallationPayload {
    pub action: String,
    pub installation: InstallationRef,
    pub sender: Account,
    pub organization: Option<Account>,
}

#[derive(Debug, Deserialize)]
pub struct RepoRef {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct InstallationRepositoriesPayload {
    pub action: String,
    #[serde(default)]
    pub repositories_added: Vec<RepoRef>,
    #[serde(default)]
    pub repositories_removed: Vec<RepoRef>,
    pub sender: Account,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuiteInfo {
    pub head_sha: String,
    pub head_branch: Option<String>,
    pub head_commit: Option<CommitInfo>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuitePayload {
    pub action: String,
    pub check_suite: CheckSuiteInfo,
    pub repository: Repository,
    pub installation: InstallationRef,
    pub sender: Account,
}

#[derive(Debug, Deserialize)]
pub struct PrBranch {
    pub sha: String,
    pub repo: Repository,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub head: PrBranch,
    pub base: PrBranch,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub action: String,
    pub pull_request: PullRequestInfo,
    pub repository: Repository,
    pub installation: Option<InstallationRef>,
    pub sender: Account,
}

/// Every webhook shape the bridge routes, plus an explicit unknown arm.
#[derive(Debug)]
pub enum WebhookEvent {
    Ping(PingPayload),
    Installation(InstallationPayload),
    InstallationRepositories(InstallationRepositoriesPayload),
    CheckSuite(Box<CheckSuitePayload>),
    CheckRun,
    PullRequest(Box<PullRequestPayload>),
    Unknown(String),
}

impl WebhookEvent {
    /// Decode from the `X-GitHub-Event` header value and the raw body.
    pub fn decode(event_type: &str, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match event_type {
            "ping" => Self::Ping(serde_json::from_slice(body)?),
            "installation" => Self::Installation(serde_json::from_slice(body)?),
            "installation_repositories" => {
                Self::InstallationRepositories(serde_json::from_slice(body)?)
            }
            "check_suite" => Self::CheckSuite(serde_json::from_slice(body)?),
            "check_run" => Self::CheckRun,
            "pull_request" => Self::PullRequest(serde_json::from_slice(body)?),
            other => Self::Unknown(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_SUITE_BODY: &str = r#"{
        "action": "requested",
        "check_suite": {
            "head_sha": "0123456789abcdef0123456789abcdef01234567",
            "head_branch": "main",
            "head_commit": {
                "message": "fix: handle empty input\n\nLonger body.",
                "author": {"name": "Alice Example"}
            },
            "pull_requests": []
        },
        "repository": {
            "name": "widget",
            "full_name": "alice/widget",
            "private": false,
            "clone_url": "https://github.com/alice/widget.git",
            "html_url": "https://github.com/alice/widget",
            "owner": {"login": "alice"}
        },
        "installation": {"id": 99},
        "sender": {"login": "alice"}
    }"#;

    #[test]
    fn decodes_check_suite() {
        let event = WebhookEvent::decode("check_suite", CHECK_SUITE_BODY.as_bytes()).unwrap();
        let WebhookEvent::CheckSuite(payload) = event else {
            panic!("expected check_suite event");
        };
        assert_eq!(payload.action, "requested");
        assert_eq!(payload.installation.id, 99);
        assert_eq!(payload.check_suite.head_branch.as_deref(), Some("main"));
        assert!(payload.check_suite.pull_requests.is_empty());
        let commit = payload.check_suite.head_commit.unwrap();
        assert_eq!(commit.message.lines().next(), Some("fix: handle empty input"));
    }

    #[test]
    fn unknown_event_types_are_explicit() {
        let event = WebhookEvent::decode("workflow_dispatch", b"{}").unwrap();
        let WebhookEvent::Unknown(name) = event else {
            panic!("expected unknown event");
        };
        assert_eq!(name, "workflow_dispatch");
    }

    #[test]
    fn check_run_ignores_payload() {
        let event = WebhookEvent::decode("check_run", b"not even json").unwrap();
        assert!(matches!(event, WebhookEvent::CheckRun));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(WebhookEvent::decode("check_suite", b"{}").is_err());
    }
}
