//! Prometheus metrics for the artifact publisher.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines metric name constants.  Until [`init_metrics`] runs, the
//! `metrics` macros are no-ops, so library users and tests pay nothing.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Object store call attempts (counter). Labels: operation.
pub const STORE_ATTEMPTS_TOTAL: &str = "artifact_publisher_store_attempts_total";

/// Retries after transient failures (counter). Labels: operation.
pub const STORE_RETRIES_TOTAL: &str = "artifact_publisher_store_retries_total";

/// Calls that failed for good (counter). Labels: operation.
pub const STORE_FAILURES_TOTAL: &str = "artifact_publisher_store_failures_total";

/// Payload bytes successfully published (counter).
pub const PUBLISHED_BYTES_TOTAL: &str = "artifact_publisher_published_bytes_total";

/// Tasks waiting for an upload worker (gauge).
pub const UPLOAD_QUEUE_DEPTH: &str = "artifact_publisher_upload_queue_depth";

/// Upload workers currently running a task (gauge).
pub const UPLOAD_WORKERS_BUSY: &str = "artifact_publisher_upload_workers_busy";

/// Submission payload validations (counter). Labels: result.
pub const SUBMISSION_VALIDATIONS_TOTAL: &str = "artifact_publisher_submission_validations_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Fails only if another recorder is already installed.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(STORE_ATTEMPTS_TOTAL, "Object store call attempts");
    describe_counter!(
        STORE_RETRIES_TOTAL,
        "Object store calls retried after a transient failure"
    );
    describe_counter!(STORE_FAILURES_TOTAL, "Object store calls that failed for good");
    describe_counter!(PUBLISHED_BYTES_TOTAL, "Payload bytes published");
    describe_gauge!(UPLOAD_QUEUE_DEPTH, "Tasks waiting for an upload worker");
    describe_gauge!(UPLOAD_WORKERS_BUSY, "Upload workers running a task");
    describe_counter!(
        SUBMISSION_VALIDATIONS_TOTAL,
        "Submission payload validations by result"
    );
}

/// Render the current metrics in Prometheus exposition format, if the
/// recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

// -- Tests --------------------------------------------------------------------
