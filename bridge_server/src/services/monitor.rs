//! Per-job background monitors and the process-wide wait barrier.
//!
//! Each submitted job gets one independent task that polls the builds
//! service and mirrors status transitions onto the originating commit. The
//! task outlives the webhook request that spawned it; its cancellation
//! handle comes from process lifecycle, so shutdown can stop all monitors
//! and wait for them behind one barrier.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::metrics;
use crate::models::error::BridgeError;
use crate::models::job::{commit_status_for, JobStatus, StatusState};
use crate::services::builds_service::BuildsClient;
use crate::services::check_suite::CheckSuiteContext;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_FETCH_RETRIES: u32 = 10;

/// Deadline for the final failure write, so a dead builds service cannot
/// hold up process shutdown.
const FINAL_WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Where the monitor reads job status from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn job_status(&self, job_id: i64) -> Result<JobStatus, BridgeError>;
}

#[async_trait]
impl JobSource for BuildsClient {
    async fn job_status(&self, job_id: i64) -> Result<JobStatus, BridgeError> {
        self.fetch_job_status(job_id).await
    }
}

/// Where the monitor writes origin statuses to.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, state: StatusState, description: &str) -> Result<(), BridgeError>;
}

/// Writes commit statuses for one job's (context, target URL) pair.
struct CommitStatusSink {
    ctx: CheckSuiteContext,
    status_context: String,
    target_url: String,
}

#[async_trait]
impl StatusSink for CommitStatusSink {
    async fn publish(&self, state: StatusState, description: &str) -> Result<(), BridgeError> {
        self.ctx
            .update_status(
                &self.status_context,
                Some(&self.target_url),
                state,
                description,
            )
            .await
    }
}

/// Tracks every monitor task so shutdown can cancel them and wait for the
/// set to drain.
#[derive(Clone)]
pub struct MonitorSet {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Default for MonitorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorSet {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the monitor for one submitted job.
    pub fn spawn_monitor(
        &self,
        ctx: CheckSuiteContext,
        status_context: String,
        target_url: String,
        job_id: i64,
    ) {
        let cancel = self.cancel.clone();
        let _handle = self.tracker.spawn(async move {
            let builds = ctx.builds.clone();
            let sink = CommitStatusSink {
                ctx,
                status_context,
                target_url,
            };

            if let Err(err) = run_monitor(&builds, &sink, job_id, POLL_INTERVAL, &cancel).await {
                tracing::error!(job_id, error = %err, "failed to monitor job");
                metrics::monitor_failed();

                let final_write =
                    sink.publish(StatusState::Failure, "internal error");
                if tokio::time::timeout(FINAL_WRITE_DEADLINE, final_write)
                    .await
                    .is_err()
                {
                    tracing::warn!(job_id, "timed out writing final failure status");
                }
            }
        });
    }

    /// Cancel all monitors and wait for them to drain, bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!("job monitors still running at shutdown deadline");
        }
    }
}

async fn sleep_or_cancelled(
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), BridgeError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(BridgeError::internal("monitoring cancelled by shutdown")),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

/// Fetch the job status, retrying transient failures at the poll interval.
async fn fetch_with_retries(
    source: &dyn JobSource,
    job_id: i64,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<JobStatus, BridgeError> {
    let mut last_err = None;
    for attempt in 1..=MAX_FETCH_RETRIES {
        match source.job_status(job_id).await {
            Ok(status) => return Ok(status),
            Err(err) => {
                tracing::warn!(
                    job_id,
                    attempt,
                    max = MAX_FETCH_RETRIES,
                    error = %err,
                    "failed to fetch job"
                );
                last_err = Some(err);
                if attempt < MAX_FETCH_RETRIES {
                    sleep_or_cancelled(interval, cancel).await?;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| BridgeError::internal("job fetch failed")))
}

/// Poll one job until it reaches a terminal state.
///
/// Writes exactly one origin status per distinct consecutive status value;
/// unchanged observations are skipped because status writes are
/// rate-limited. A failed write is logged but does not stop monitoring.
pub async fn run_monitor(
    source: &dyn JobSource,
    sink: &dyn StatusSink,
    job_id: i64,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), BridgeError> {
    let mut last: Option<JobStatus> = None;

    loop {
        sleep_or_cancelled(interval, cancel).await?;

        let status = fetch_with_retries(source, job_id, interval, cancel).await?;

        if last != Some(status) {
            let (state, description) = commit_status_for(status);
            if let Err(err) = sink.publish(state, description).await {
                tracing::warn!(job_id, error = %err, "failed to update commit status");
            }
            metrics::job_status_changed(status.as_str());
            last = Some(status);
        }

        if status.is_terminal() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Replays a scripted status sequence; `Err` entries simulate transient
    /// fetch failures.
    struct ScriptedSource {
        script: Mutex<Vec<Result<JobStatus, ()>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<JobStatus, ()>>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl JobSource for ScriptedSource {
        async fn job_status(&self, _job_id: i64) -> Result<JobStatus, BridgeError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                panic!("monitor polled past the end of the script");
            }
            script
                .remove(0)
                .map_err(|_| BridgeError::internal("fetch failed"))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(StatusState, String)>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn publish(&self, state: StatusState, description: &str) -> Result<(), BridgeError> {
            self.writes
                .lock()
                .unwrap()
                .push((state, description.to_string()));
            Ok(())
        }
    }

    async fn run(script: Vec<Result<JobStatus, ()>>) -> (Result<(), BridgeError>, Vec<(StatusState, String)>) {
        let source = ScriptedSource::new(script);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let result = run_monitor(&source, &sink, 1, Duration::from_millis(1), &cancel).await;
        let writes = sink.writes.into_inner().unwrap();
        (result, writes)
    }

    #[tokio::test]
    async fn one_write_per_distinct_status_and_stop_at_terminal() {
        use JobStatus::*;
        let (result, writes) = run(vec![
            Ok(Pending),
            Ok(Queued),
            Ok(Running),
            Ok(Success),
        ])
        .await;

        result.unwrap();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0], (StatusState::Pending, "job pending…".to_string()));
        assert_eq!(writes[3], (StatusState::Success, "job completed".to_string()));
    }

    #[tokio::test]
    async fn unchanged_statuses_are_not_rewritten() {
        use JobStatus::*;
        let (result, writes) = run(vec![
            Ok(Pending),
            Ok(Pending),
            Ok(Queued),
            Ok(Queued),
            Ok(Queued),
            Ok(Failed),
        ])
        .await;

        result.unwrap();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[1], (StatusState::Pending, "job queued…".to_string()));
        assert_eq!(writes[2], (StatusState::Error, "job failed".to_string()));
    }

    #[tokio::test]
    async fn stops_polling_after_first_terminal_status() {
        use JobStatus::*;
        // The script holds nothing past the terminal status; polling again
        // would panic in ScriptedSource.
        let (result, writes) = run(vec![Ok(Running), Ok(Cancelled)]).await;
        result.unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[1],
            (StatusState::Failure, "job cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        use JobStatus::*;
        let (result, writes) = run(vec![Err(()), Err(()), Ok(Success)]).await;
        result.unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], (StatusState::Success, "job completed".to_string()));
    }

    #[tokio::test]
    async fn gives_up_after_retry_bound() {
        let script: Vec<Result<JobStatus, ()>> =
            (0..MAX_FETCH_RETRIES).map(|_| Err(())).collect();
        let (result, writes) = run(script).await;
        assert!(result.is_err());
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_the_monitor() {
        let source = ScriptedSource::new(vec![Ok(JobStatus::Pending); 8]);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_monitor(
            &source,
            &sink,
            1,
            Duration::from_millis(1),
            &cancel,
        )
        .await;
        assert!(result.is_err());
        assert!(sink.writes.into_inner().unwrap().is_empty());
    }
}
