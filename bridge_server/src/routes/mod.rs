//! HTTP surface — webhook endpoint plus the installation pages.

pub mod install;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::BridgeConfig;
use crate::services::github_service::GithubClient;
use crate::services::installation_store::InstallationStore;
use crate::services::monitor::MonitorSet;
use crate::services::oauth_service::OAuthClient;

/// Shared state for route handlers.
pub struct AppState {
    pub config: BridgeConfig,
    pub store: InstallationStore,
    pub github: GithubClient,
    /// Absent when no OAuth client is configured; the manual-token flow on
    /// the post-install page still works.
    pub oauth: Option<OAuthClient>,
    pub monitors: MonitorSet,
}

/// Build the bridge's Axum router.
pub fn bridge_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(install::index))
        .route("/authorize", get(install::authorize))
        .route(
            "/post-install",
            get(install::post_install).post(install::post_install_submit),
        )
        .route("/webhook", post(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .with_state(state)
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    webhook::handle_webhook(&state, &headers, body).await
}
