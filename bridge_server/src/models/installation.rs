//! Installation — one linkage between a GitHub account/org and the bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record keyed by the GitHub installation id.
///
/// A record without an access token is pending (the downstream authorization
/// has not completed yet). A record with a token but no refresh token is a
/// legacy grant and is never refreshed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub id: i64,
    /// Login of the user who installed the app.
    pub owner: String,
    /// Organization login, when installed on an org.
    pub org: Option<String>,
    pub created_at: DateTime<Utc>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Installation {
    pub fn new(id: i64, owner: impl Into<String>, org: Option<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            org,
            created_at: Utc::now(),
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
        }
    }

    /// Authorization not yet completed.
    pub fn is_pending(&self) -> bool {
        self.access_token.is_none()
    }

    /// GitHub settings page for this installation.
    pub fn settings_url(&self) -> String {
        match &self.org {
            Some(org) => format!(
                "https://github.com/organizations/{}/settings/installations/{}",
                org, self.id
            ),
            None => format!("https://github.com/settings/installations/{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_installation_is_pending() {
        let installation = Installation::new(42, "alice", None);
        assert!(installation.is_pending());
        assert!(installation.refresh_token.is_none());
    }

    #[test]
    fn settings_url_depends_on_org() {
        let user = Installation::new(7, "alice", None);
        assert_eq!(
            user.settings_url(),
            "https://github.com/settings/installations/7"
        );

        let org = Installation::new(7, "alice", Some("acme".to_string()));
        assert_eq!(
            org.settings_url(),
            "https://github.com/organizations/acme/settings/installations/7"
        );
    }
}
