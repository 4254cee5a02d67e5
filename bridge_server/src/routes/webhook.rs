//! GitHub webhook handler — decodes events and drives the orchestrator.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};

use crate::models::error::BridgeError;
use crate::models::event::{
    CheckSuitePayload, InstallationPayload, PullRequestPayload, WebhookEvent,
};
use crate::models::installation::Installation;
use crate::routes::AppState;
use crate::services::builds_service::BuildsClient;
use crate::services::check_suite::{self, CheckSuiteContext};
use crate::services::{github_service, oauth_service};

/// Handle an incoming GitHub webhook payload.
pub async fn handle_webhook(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&state.config.webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    crate::metrics::webhook_received(event_type);

    let event = WebhookEvent::decode(event_type, &body).map_err(|e| {
        tracing::warn!("Failed to parse {} webhook payload: {}", event_type, e);
        StatusCode::BAD_REQUEST
    })?;

    match dispatch(state, event).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => {
            tracing::error!("Failed to handle {} event: {}", event_type, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn dispatch(state: &AppState, event: WebhookEvent) -> Result<(), BridgeError> {
    match event {
        WebhookEvent::Ping(payload) => {
            tracing::info!(zen = payload.zen.as_deref().unwrap_or(""), "received ping");
            Ok(())
        }
        WebhookEvent::Installation(payload) => handle_installation(state, payload).await,
        WebhookEvent::InstallationRepositories(payload) => {
            tracing::info!(
                action = %payload.action,
                sender = %payload.sender.login,
                added = payload.repositories_added.len(),
                removed = payload.repositories_removed.len(),
                "installation repositories changed"
            );
            for repo in &payload.repositories_added {
                tracing::debug!(repo = %repo.full_name, "repository added to installation");
            }
            for repo in &payload.repositories_removed {
                tracing::debug!(repo = %repo.full_name, "repository removed from installation");
            }
            Ok(())
        }
        WebhookEvent::CheckSuite(payload) => handle_check_suite(state, *payload).await,
        WebhookEvent::CheckRun => Ok(()),
        WebhookEvent::PullRequest(payload) => handle_pull_request(state, *payload).await,
        WebhookEvent::Unknown(event_type) => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            Ok(())
        }
    }
}

async fn handle_installation(
    state: &AppState,
    payload: InstallationPayload,
) -> Result<(), BridgeError> {
    tracing::info!(
        action = %payload.action,
        sender = %payload.sender.login,
        installation_id = payload.installation.id,
        "installation event"
    );

    match payload.action.as_str() {
        "created" => {
            let record = Installation::new(
                payload.installation.id,
                payload.sender.login,
                payload.organization.map(|org| org.login),
            );
            state.store.put(&record).await
        }
        "deleted" => state.store.delete(payload.installation.id).await,
        _ => Ok(()),
    }
}

async fn handle_check_suite(
    state: &AppState,
    payload: CheckSuitePayload,
) -> Result<(), BridgeError> {
    if payload.action != "requested" && payload.action != "rerequested" {
        return Ok(());
    }

    let Some(mut installation) = state.store.get(payload.installation.id).await? else {
        tracing::debug!(
            installation_id = payload.installation.id,
            "no record for installation, skipping check suite"
        );
        return Ok(());
    };

    // Opportunistic refresh; a stale token is still worth trying with.
    match oauth_service::refresh_if_needed(state.oauth.as_ref(), &state.store, &mut installation)
        .await
    {
        Ok(true) => crate::metrics::token_refreshed("ok"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(
                installation_id = installation.id,
                error = %err,
                "failed to refresh builds token"
            );
            crate::metrics::token_refreshed("error");
        }
    }

    // A suite with exactly one attached PR builds as a PR; a suite with none
    // builds as a branch push.
    let (pull_request, head_branch) = match payload.check_suite.pull_requests.as_slice() {
        [pr] => (Some(pr.number), None),
        [] => (None, payload.check_suite.head_branch.clone()),
        _ => (None, None),
    };

    let ctx = CheckSuiteContext {
        installation_id: installation.id,
        github: state.github.clone(),
        builds: builds_client_for(state, &installation),
        owner_submitted: payload.sender.login == installation.owner,
        base_repo: payload.repository.clone(),
        head_repo: payload.repository,
        head_sha: payload.check_suite.head_sha,
        head_commit: payload.check_suite.head_commit.unwrap_or_default(),
        pull_request,
        head_branch,
    };

    check_suite::start_check_suite(&ctx, &state.monitors).await
}

/// GitHub does not create a check-suite event for pull requests made from a
/// fork, so those arrive as pull_request events instead.
async fn handle_pull_request(
    state: &AppState,
    payload: PullRequestPayload,
) -> Result<(), BridgeError> {
    if !matches!(
        payload.action.as_str(),
        "opened" | "reopened" | "synchronize"
    ) {
        return Ok(());
    }
    if payload.pull_request.head.repo.full_name == payload.pull_request.base.repo.full_name {
        return Ok(());
    }
    let Some(installation_ref) = payload.installation else {
        return Ok(());
    };

    let Some(installation) = state.store.get(installation_ref.id).await? else {
        tracing::debug!(
            installation_id = installation_ref.id,
            "no record for installation, skipping pull request"
        );
        return Ok(());
    };

    let head = payload.pull_request.head;
    let head_commit = state
        .github
        .get_commit(
            installation.id,
            &head.repo.owner.login,
            &head.repo.name,
            &head.sha,
        )
        .await?;

    let ctx = CheckSuiteContext {
        installation_id: installation.id,
        github: state.github.clone(),
        builds: builds_client_for(state, &installation),
        owner_submitted: payload.sender.login == installation.owner,
        base_repo: payload.repository,
        head_repo: head.repo,
        head_sha: head.sha,
        head_commit,
        pull_request: Some(payload.pull_request.number),
        head_branch: None,
    };

    check_suite::start_check_suite(&ctx, &state.monitors).await
}

/// Builds client holding a snapshot of the installation's token. A pending
/// installation yields an unauthenticated client; its submissions fail with
/// a user-visible authorization error.
fn builds_client_for(state: &AppState, installation: &Installation) -> BuildsClient {
    BuildsClient::new(
        &state.config.builds_endpoint,
        installation.access_token.as_deref().unwrap_or_default(),
    )
}
