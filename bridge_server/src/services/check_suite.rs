//! Check-suite orchestration — the webhook-triggered pipeline that turns a
//! commit into one or more remote build jobs.
//!
//! Per event: enumerate manifest candidates, then for each one resolve →
//! transform → submit → create a pending commit status → hand the job to a
//! background monitor. The first failure aborts the remaining candidates
//! and leaves a single failing status behind.

use serde_yaml::Value;

use crate::metrics;
use crate::models::error::BridgeError;
use crate::models::event::{CommitInfo, Repository};
use crate::models::job::{StatusState, Visibility};
use crate::services::builds_service::BuildsClient;
use crate::services::github_service::GithubClient;
use crate::services::manifest;
use crate::services::monitor::MonitorSet;

/// Commit-status context label; named manifests get a `/<name>` suffix.
pub const STATUS_CONTEXT: &str = "builds";

/// Everything one check-suite event needs, copied per event and shared with
/// the monitors it spawns. The builds token inside is a snapshot taken at
/// orchestration start.
#[derive(Clone)]
pub struct CheckSuiteContext {
    pub installation_id: i64,
    pub github: GithubClient,
    pub builds: BuildsClient,
    pub base_repo: Repository,
    pub head_repo: Repository,
    pub head_sha: String,
    pub head_commit: CommitInfo,
    /// Whether the triggering actor is the installation owner; governs
    /// whether job secrets are auto-included.
    pub owner_submitted: bool,
    pub pull_request: Option<u64>,
    pub head_branch: Option<String>,
}

impl CheckSuiteContext {
    pub(crate) async fn update_status(
        &self,
        context: &str,
        target_url: Option<&str>,
        state: StatusState,
        description: &str,
    ) -> Result<(), BridgeError> {
        self.github
            .create_status(
                self.installation_id,
                &self.base_repo,
                &self.head_sha,
                state,
                description,
                target_url,
                context,
            )
            .await
    }
}

/// Run the whole pipeline for one event. User errors end up on the commit
/// status with their message and are not propagated; internal errors leave
/// a generic failing status and are returned to the caller.
pub async fn start_check_suite(
    ctx: &CheckSuiteContext,
    monitors: &MonitorSet,
) -> Result<(), BridgeError> {
    let Err(err) = run(ctx, monitors).await else {
        return Ok(());
    };

    let description = match err.user_message() {
        Some(msg) => msg.to_string(),
        None => {
            tracing::error!(
                repo = %ctx.base_repo.full_name,
                sha = %ctx.head_sha,
                error = %err,
                "check suite failed"
            );
            "internal error".to_string()
        }
    };

    if let Err(status_err) = ctx
        .update_status(STATUS_CONTEXT, None, StatusState::Failure, &description)
        .await
    {
        tracing::warn!(error = %status_err, "failed to create failing commit status");
    }

    // User errors are the user's to see, not the webhook caller's.
    if err.user_message().is_some() {
        Ok(())
    } else {
        Err(err)
    }
}

async fn run(ctx: &CheckSuiteContext, monitors: &MonitorSet) -> Result<(), BridgeError> {
    let owner = &ctx.head_repo.owner.login;
    let repo = &ctx.head_repo.name;

    let candidates = manifest::list_candidates(
        &ctx.github,
        ctx.installation_id,
        owner,
        repo,
        &ctx.head_sha,
    )
    .await?;

    let candidates = manifest::select_candidates(
        candidates,
        manifest::MAX_JOBS_PER_CHECK_SUITE,
        &mut rand::thread_rng(),
    );

    for path in &candidates {
        start_job(ctx, monitors, path).await?;
    }

    Ok(())
}

/// Resolve, transform and submit one manifest, then create the initial
/// commit status and spawn its monitor.
async fn start_job(
    ctx: &CheckSuiteContext,
    monitors: &MonitorSet,
    path: &str,
) -> Result<(), BridgeError> {
    let name = manifest::display_name(path);

    let Some(mut doc) = manifest::fetch_manifest(
        &ctx.github,
        ctx.installation_id,
        &ctx.head_repo.owner.login,
        &ctx.head_repo.name,
        &ctx.head_sha,
        path,
    )
    .await?
    else {
        return Ok(());
    };

    manifest::rewrite_sources(
        &mut doc,
        &ctx.head_repo.name,
        &ctx.head_repo.clone_url,
        &ctx.head_sha,
    )?;
    manifest::mark_submitter(&mut doc)?;

    let manifest_text = serde_yaml::to_string(&Value::Mapping(doc))
        .map_err(|e| BridgeError::internal(format!("failed to serialize manifest: {e}")))?;

    let tags = manifest::job_tags(
        &ctx.base_repo.name,
        ctx.pull_request,
        ctx.head_branch.as_deref(),
        name.as_deref(),
    );
    let note = manifest::job_note(
        &ctx.head_commit.message,
        &ctx.head_sha,
        &ctx.head_commit.author.name,
        &ctx.head_repo.html_url,
    );

    let visibility = if ctx.head_repo.private {
        Visibility::Private
    } else {
        Visibility::Public
    };
    // Automatic secrets (server default) only for the installation owner; a
    // contributor's pull request must not see the owner's stored secrets.
    let secrets = if ctx.owner_submitted { None } else { Some(false) };

    let job = ctx
        .builds
        .submit_job(&manifest_text, &tags, &note, secrets, visibility)
        .await?;
    metrics::job_submitted();

    tracing::info!(
        repo = %ctx.base_repo.full_name,
        sha = %ctx.head_sha,
        job_id = job.id,
        manifest = path,
        "submitted build job"
    );

    let status_context = match &name {
        Some(name) => format!("{STATUS_CONTEXT}/{name}"),
        None => STATUS_CONTEXT.to_string(),
    };
    let details_url = ctx.builds.job_url(&job.owner, job.id);

    ctx.update_status(
        &status_context,
        Some(&details_url),
        StatusState::Pending,
        "build started…",
    )
    .await?;

    monitors.spawn_monitor(ctx.clone(), status_context, details_url, job.id);

    Ok(())
}
