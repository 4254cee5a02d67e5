//! OAuth2 credential lifecycle for the builds service.
//!
//! Covers exactly what the bridge needs: endpoint discovery from provider
//! metadata, the authorization-code exchange, and proactive refresh. Tokens
//! are verified (by fetching the authenticated user) before they are ever
//! persisted.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use url::Url;

use crate::models::error::BridgeError;
use crate::models::installation::Installation;
use crate::services::builds_service::BuildsClient;
use crate::services::installation_store::InstallationStore;

/// Scopes requested at authorization time.
pub const BUILDS_GRANTS: &str = "PROFILE:RO JOBS:RW";

/// Refresh when less than this much lifetime remains. Refresh is attempted
/// opportunistically on check-suite events, which may be weeks apart, so the
/// horizon has to be generous.
pub const REFRESH_HORIZON_DAYS: i64 = 15;

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    authorization_endpoint: String,
    token_endpoint: String,
}

/// Token endpoint response. `expires_in` is in seconds; `refresh_token` is
/// absent on non-refreshable grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Wrap a manually supplied token (no refresh, no known expiry).
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "bearer".to_string(),
            expires_in: None,
            refresh_token: None,
        }
    }

    fn ensure_bearer(&self) -> Result<(), BridgeError> {
        if self.token_type.eq_ignore_ascii_case("bearer") {
            Ok(())
        } else {
            Err(BridgeError::internal(format!(
                "unsupported OAuth2 token type {:?}",
                self.token_type
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    authorization_endpoint: Url,
    token_endpoint: String,
}

impl OAuthClient {
    /// Discover provider endpoints from its OAuth2 server metadata.
    pub async fn discover(
        identity_endpoint: &str,
        client_id: &str,
        client_secret: &str,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("buildbridge")
            .build()?;
        let url = format!(
            "{}/.well-known/oauth-authorization-server",
            identity_endpoint.trim_end_matches('/')
        );
        let metadata: ProviderMetadata = http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!(
            token_endpoint = %metadata.token_endpoint,
            "discovered OAuth2 provider metadata"
        );

        let authorization_endpoint = Url::parse(&metadata.authorization_endpoint)
            .map_err(|e| anyhow::anyhow!("invalid authorization endpoint: {e}"))?;

        Ok(Self {
            http,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            authorization_endpoint,
            token_endpoint: metadata.token_endpoint,
        })
    }

    /// Authorization page URL carrying `state` back through the provider.
    pub fn authorization_url(&self, state: &str) -> String {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", BUILDS_GRANTS)
            .append_pair("state", state);
        url.to_string()
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, BridgeError> {
        let resp = self
            .http
            .post(&self.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await?;

        let body = resp.text().await?;
        if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
            let message = err.error_description.unwrap_or(err.error);
            return Err(BridgeError::internal(format!(
                "token endpoint rejected the request: {message}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| BridgeError::internal(format!("malformed token response: {e}")))?;
        token.ensure_bearer()?;
        Ok(token)
    }

    /// Complete the authorization-code exchange.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, BridgeError> {
        self.token_request(&[("grant_type", "authorization_code"), ("code", code)])
            .await
    }

    /// Obtain a fresh token pair from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, BridgeError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

/// Apply a token response to the record: access token, refresh token (absent
/// on non-refreshable grants) and expiry re-derived as now + declared
/// lifetime.
fn apply_token(installation: &mut Installation, token: &TokenResponse, now: DateTime<Utc>) {
    installation.access_token = Some(token.access_token.clone());
    installation.refresh_token = token.refresh_token.clone();
    installation.token_expires_at = token.expires_in.map(|secs| now + Duration::seconds(secs));
}

/// Verify a freshly obtained token against the builds service, then persist
/// it. A token that cannot authenticate is invalid input, not stored.
pub async fn save_token(
    store: &InstallationStore,
    builds_endpoint: &str,
    installation: &mut Installation,
    token: &TokenResponse,
) -> Result<(), BridgeError> {
    token.ensure_bearer()?;
    apply_token(installation, token, Utc::now());

    let builds = BuildsClient::new(builds_endpoint, &token.access_token);
    let user = builds.fetch_user().await.map_err(|err| {
        BridgeError::user(format!("token validation failed: {err}"))
    })?;

    store.put(installation).await?;
    tracing::info!(
        user = %user.canonical_name,
        installation_id = installation.id,
        "completed installation authorization"
    );
    Ok(())
}

/// Whether the token should be refreshed now. Legacy grants (no refresh
/// token) and tokens without a recorded expiry are never refreshed.
pub fn needs_refresh(installation: &Installation, now: DateTime<Utc>) -> bool {
    match (&installation.refresh_token, installation.token_expires_at) {
        (Some(_), Some(expires_at)) => expires_at - now < Duration::days(REFRESH_HORIZON_DAYS),
        _ => false,
    }
}

/// Proactively refresh the installation's token when its remaining lifetime
/// drops below the horizon. On failure the stored record is left untouched
/// and the caller proceeds with the existing (possibly stale) token.
pub async fn refresh_if_needed(
    oauth: Option<&OAuthClient>,
    store: &InstallationStore,
    installation: &mut Installation,
) -> Result<bool, BridgeError> {
    let Some(oauth) = oauth else {
        return Ok(false);
    };
    let refresh_token = match &installation.refresh_token {
        Some(token) if needs_refresh(installation, Utc::now()) => token.clone(),
        _ => return Ok(false),
    };

    let token = oauth.refresh(&refresh_token).await?;

    apply_token(installation, &token, Utc::now());
    store.put(installation).await?;
    tracing::info!(
        installation_id = installation.id,
        "refreshed builds service token"
    );
    Ok(true)
}
