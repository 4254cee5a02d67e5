//! Bridge configuration — CLI flags with environment fallbacks.

use clap::Parser;

#[derive(Parser)]
#[command(name = "buildbridge", about = "GitHub to remote-builds bridge")]
pub struct Cli {
    /// Listening address
    #[arg(long, default_value = "0.0.0.0:3333", env = "BRIDGE_LISTEN")]
    pub listen: String,

    /// Database path
    #[arg(long, default_value = "bridge.db", env = "BRIDGE_DB")]
    pub db: String,

    /// GitHub App ID
    #[arg(long = "gh-app-id", env = "GITHUB_APP_IDENTIFIER")]
    pub gh_app_id: Option<String>,

    /// GitHub App private key path (PEM)
    #[arg(long = "gh-private-key", env = "GITHUB_PRIVATE_KEY")]
    pub gh_private_key: Option<String>,

    /// GitHub webhook secret
    #[arg(long = "gh-webhook-secret", env = "GITHUB_WEBHOOK_SECRET", default_value = "")]
    pub gh_webhook_secret: String,

    /// Builds service endpoint
    #[arg(long, default_value = "https://builds.sr.ht", env = "BUILDS_ENDPOINT")]
    pub builds_endpoint: String,

    /// Identity provider endpoint (OAuth2 discovery source)
    #[arg(long, default_value = "https://meta.sr.ht", env = "META_ENDPOINT")]
    pub meta_endpoint: String,

    /// OAuth2 client ID (optional)
    #[arg(long, env = "BUILDS_CLIENT_ID")]
    pub oauth_client_id: Option<String>,

    /// OAuth2 client secret (optional)
    #[arg(long, env = "BUILDS_CLIENT_SECRET")]
    pub oauth_client_secret: Option<String>,
}

/// Validated runtime configuration.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub listen: String,
    pub db_path: String,
    pub github_app_id: String,
    /// Path to the app's private key (PEM).
    pub github_private_key: String,
    /// Webhook HMAC secret; empty disables validation (with a warning).
    pub webhook_secret: String,
    pub builds_endpoint: String,
    pub meta_endpoint: String,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
}

impl BridgeConfig {
    /// Validate the CLI input. Missing app credentials are fatal; every
    /// other gap degrades with a warning.
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let github_app_id = cli
            .gh_app_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing --gh-app-id"))?;
        let github_private_key = cli
            .gh_private_key
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing --gh-private-key"))?;

        if cli.gh_webhook_secret.is_empty() {
            tracing::warn!("webhook secret not set -- signature validation disabled");
        }
        if cli.oauth_client_id.is_none() {
            tracing::info!("OAuth client not configured -- manual tokens only");
        }

        Ok(Self {
            listen: cli.listen,
            db_path: cli.db,
            github_app_id,
            github_private_key,
            webhook_secret: cli.gh_webhook_secret,
            builds_endpoint: cli.builds_endpoint.trim_end_matches('/').to_string(),
            meta_endpoint: cli.meta_endpoint.trim_end_matches('/').to_string(),
            oauth_client_id: cli.oauth_client_id,
            oauth_client_secret: cli.oauth_client_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from([
            "buildbridge",
            "--gh-app-id",
            "1234",
            "--gh-private-key",
            "/etc/bridge/key.pem",
        ])
    }

    #[test]
    fn valid_cli_produces_config() {
        let config = BridgeConfig::from_cli(base_cli()).unwrap();
        assert_eq!(config.github_app_id, "1234");
        assert_eq!(config.builds_endpoint, "https://builds.sr.ht");
        assert!(config.oauth_client_id.is_none());
    }

    #[test]
    fn missing_app_credentials_are_fatal() {
        let cli = Cli::parse_from(["buildbridge", "--gh-app-id", "1234"]);
        assert!(BridgeConfig::from_cli(cli).is_err());
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let cli = Cli::parse_from([
            "buildbridge",
            "--gh-app-id",
            "1",
            "--gh-private-key",
            "k.pem",
            "--builds-endpoint",
            "https://builds.example.org/",
        ]);
        let config = BridgeConfig::from_cli(cli).unwrap();
        assert_eq!(config.builds_endpoint, "https://builds.example.org");
    }
}
