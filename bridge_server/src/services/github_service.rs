//! GitHub integration — webhook validation, App authentication, contents
//! and commit-status APIs.
//!
//! The bridge authenticates as a GitHub App: an RS256-signed app JWT is
//! exchanged for short-lived per-installation access tokens, which are
//! cached until close to expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::models::error::BridgeError;
use crate::models::event::{CommitInfo, Repository};
use crate::models::job::{truncate_description, StatusState};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(120);
const JWT_VALIDITY_SECS: i64 = 9 * 60;
const USER_AGENT: &str = "buildbridge";

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

#[derive(Serialize)]
struct AppJwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// A directory entry from the contents API.
#[derive(Debug, Clone, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Deserialize)]
struct FileContents {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CommitResponse {
    commit: CommitInfo,
}

/// GitHub App API client, cloneable across tasks (token cache is shared).
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    app_id: String,
    encoding_key: Arc<EncodingKey>,
    token_cache: Arc<Mutex<HashMap<i64, CachedToken>>>,
}

impl GithubClient {
    pub fn new(app_id: &str, private_key_pem: &[u8]) -> anyhow::Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| anyhow::anyhow!("failed to read app private key: {e}"))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_base: "https://api.github.com".to_string(),
            app_id: app_id.to_string(),
            encoding_key: Arc::new(encoding_key),
            token_cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Short-lived JWT identifying the app itself.
    fn app_jwt(&self) -> Result<String, BridgeError> {
        let now = Utc::now().timestamp();
        let claims = AppJwtClaims {
            // Backdated to tolerate clock drift between us and GitHub.
            iat: now - 30,
            exp: now + JWT_VALIDITY_SECS,
            iss: self.app_id.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| BridgeError::internal(format!("failed to sign app JWT: {e}")))
    }

    /// Get a (possibly cached) access token for one installation.
    async fn installation_token(&self, installation_id: i64) -> Result<String, BridgeError> {
        {
            let cache = self.token_cache.lock().await;
            if let Some(cached) = cache.get(&installation_id) {
                if cached.is_valid(TOKEN_REFRESH_MARGIN) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::internal(format!(
                "failed to mint installation token ({status}): {body}"
            )));
        }

        let minted: InstallationTokenResponse = resp.json().await?;
        let valid_for = (minted.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(0));

        let mut cache = self.token_cache.lock().await;
        cache.insert(
            installation_id,
            CachedToken {
                token: minted.token.clone(),
                expires_at: Instant::now() + valid_for,
            },
        );
        tracing::debug!(installation_id, "minted installation token");

        Ok(minted.token)
    }

    async fn get(
        &self,
        installation_id: i64,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, BridgeError> {
        let token = self.installation_token(installation_id).await?;
        let resp = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .query(query)
            .send()
            .await?;
        Ok(resp)
    }

    /// List a directory at a commit. `None` when the directory is absent.
    pub async fn list_dir(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        dir: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<DirEntry>>, BridgeError> {
        let resp = self
            .get(
                installation_id,
                &format!("/repos/{owner}/{repo}/contents/{dir}"),
                &[("ref", git_ref)],
            )
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.json().await?)),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(BridgeError::internal(format!(
                    "failed to list {dir} in {owner}/{repo} ({status}): {body}"
                )))
            }
        }
    }

    /// Fetch a file's text content at a commit. `None` when absent.
    pub async fn fetch_file(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, BridgeError> {
        let resp = self
            .get(
                installation_id,
                &format!("/repos/{owner}/{repo}/contents/{path}"),
                &[("ref", git_ref)],
            )
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if status.is_success() => {}
            status => {
                let body = resp.text().await.unwrap_or_default();
                return Err(BridgeError::internal(format!(
                    "failed to download {path} ({status}): {body}"
                )));
            }
        }

        let file: FileContents = resp.json().await?;
        if file.kind != "file" {
            return Err(BridgeError::internal(format!("{path} isn't a file")));
        }

        // The contents API wraps base64 at 60 columns.
        let raw: String = file.content.split_whitespace().collect();
        let bytes = BASE64
            .decode(raw)
            .map_err(|e| BridgeError::internal(format!("failed to decode contents of {path}: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| BridgeError::internal(format!("{path} is not valid UTF-8: {e}")))?;
        Ok(Some(text))
    }

    /// Fetch commit metadata (message, author) for a SHA.
    pub async fn get_commit(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CommitInfo, BridgeError> {
        let resp = self
            .get(
                installation_id,
                &format!("/repos/{owner}/{repo}/commits/{sha}"),
                &[],
            )
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::internal(format!(
                "failed to fetch commit {sha} ({status}): {body}"
            )));
        }

        let commit: CommitResponse = resp.json().await?;
        Ok(commit.commit)
    }

    /// Create (or update) a commit status on the base repository.
    pub async fn create_status(
        &self,
        installation_id: i64,
        repo: &Repository,
        sha: &str,
        state: StatusState,
        description: &str,
        target_url: Option<&str>,
        context: &str,
    ) -> Result<(), BridgeError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!(
            "{}/repos/{}/statuses/{}",
            self.api_base, repo.full_name, sha
        );
        let body = serde_json::json!({
            "state": state.as_str(),
            "description": truncate_description(description),
            "target_url": target_url,
            "context": context,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(BridgeError::internal(format!(
                "failed to create commit status ({status}): {text}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"zen":"Keep it logically awesome."}"#;
        let signature = sign("s3cret", payload);
        assert!(validate_signature("s3cret", payload, &signature));
    }

    #[test]
    fn rejects_wrong_secret_and_garbage() {
        let payload = b"payload";
        let signature = sign("right", payload);
        assert!(!validate_signature("wrong", payload, &signature));
        assert!(!validate_signature("right", payload, "sha256=zz"));
        assert!(!validate_signature("right", b"tampered", &signature));
    }

    #[test]
    fn empty_secret_skips_validation() {
        assert!(validate_signature("", b"anything", "sha256=ignored"));
    }

    #[test]
    fn base64_content_survives_line_wrapping() {
        let encoded = BASE64.encode("image: alpine/latest\n");
        let wrapped = format!("{}\n{}", &encoded[..10], &encoded[10..]);
        let raw: String = wrapped.split_whitespace().collect();
        assert_eq!(BASE64.decode(raw).unwrap(), b"image: alpine/latest\n");
    }
}
