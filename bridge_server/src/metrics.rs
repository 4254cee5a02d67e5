//! Prometheus metrics for bridge observability.

use metrics::counter;

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("bridge_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a job submitted to the builds service.
pub fn job_submitted() {
    counter!("bridge_jobs_submitted_total").increment(1);
}

/// Record a remote job status transition observed by a monitor.
pub fn job_status_changed(status: &str) {
    counter!("bridge_job_status_total", "status" => status.to_string()).increment(1);
}

/// Record a monitor that gave up on its job.
pub fn monitor_failed() {
    counter!("bridge_monitor_failures_total").increment(1);
}

/// Record an OAuth2 token refresh outcome.
pub fn token_refreshed(outcome: &str) {
    counter!("bridge_token_refreshes_total", "outcome" => outcome.to_string()).increment(1);
}
