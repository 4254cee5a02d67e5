//! Buildbridge — GitHub App bridging check suites to a remote builds service.
//!
//! A standalone binary that receives GitHub webhooks, submits one build job
//! per manifest to the configured builds service, and mirrors each job's
//! lifecycle back onto the originating commit as a status. Installation
//! records (and their downstream OAuth2 credentials) live in a single-file
//! SQLite database.

mod config;
mod metrics;
mod models;
mod routes;
mod services;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use crate::config::{BridgeConfig, Cli};
use crate::routes::AppState;
use crate::services::github_service::GithubClient;
use crate::services::installation_store::InstallationStore;
use crate::services::monitor::MonitorSet;
use crate::services::oauth_service::OAuthClient;

/// How long shutdown waits for in-flight job monitors to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = BridgeConfig::from_cli(cli)?;

    tracing::info!("Starting buildbridge...");

    let private_key = std::fs::read(&config.github_private_key)
        .with_context(|| format!("failed to read {}", config.github_private_key))?;
    let github = GithubClient::new(&config.github_app_id, &private_key)?;

    let store = InstallationStore::open(&config.db_path)
        .await
        .context("failed to open installation store")?;

    let oauth = match (&config.oauth_client_id, &config.oauth_client_secret) {
        (Some(id), Some(secret)) => Some(
            OAuthClient::discover(&config.meta_endpoint, id, secret)
                .await
                .context("failed to discover OAuth2 provider metadata")?,
        ),
        _ => None,
    };

    let monitors = MonitorSet::new();
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        github,
        oauth,
        monitors: monitors.clone(),
    });

    metrics::init_metrics();

    let app = routes::bridge_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!("Buildbridge listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // No new webhooks past this point; let the job monitors drain.
    tracing::info!("Draining job monitors...");
    monitors.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
