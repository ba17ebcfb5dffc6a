//! Metrics definitions for the pitwall backend.
//!
//! This module defines all metrics keys used by the service and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

pub use pitwall_iracing::METRICS_ID_RATELIMIT_REMAINING;

/// Metrics key for counting persisted driver sessions, by `added` count.
pub const METRICS_ID_SESSIONS_INGESTED: &str = "driver_sessions_ingested";
/// Metrics key for counting started ingestion jobs.
pub const METRICS_ID_INGESTION_JOBS: &str = "ingestion_jobs_total";
/// Metrics key for counting aborted ingestion jobs.
pub const METRICS_ID_INGESTION_JOB_ERRORS: &str = "ingestion_job_errors_total";
/// Metrics key for jobs rejected because the driver's lock was held.
pub const METRICS_ID_INGESTION_BUSY: &str = "ingestion_busy_total";
/// Metrics key for the duration of completed ingestion jobs.
pub const METRICS_ID_INGESTION_DURATION: &str = "ingestion_job_duration_ms";
/// Metrics key for currently registered websocket connections.
pub const METRICS_ID_WS_CONNECTIONS_OPEN: &str = "ws_connections_open";
/// Metrics key for connection records reaped after a gone delivery.
pub const METRICS_ID_PUSH_GONE_REAPED: &str = "push_connections_reaped_total";
/// Metrics key for queue messages re-queued with a visibility back-off.
pub const METRICS_ID_QUEUE_RETRIES: &str = "queue_message_retries_total";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_ID_SESSIONS_INGESTED,
        metrics::Unit::Count,
        "Number of driver sessions persisted by ingestion"
    );

    metrics::describe_counter!(
        METRICS_ID_INGESTION_JOBS,
        metrics::Unit::Count,
        "Number of ingestion jobs started"
    );

    metrics::describe_counter!(
        METRICS_ID_INGESTION_JOB_ERRORS,
        metrics::Unit::Count,
        "Number of ingestion jobs that aborted"
    );

    metrics::describe_counter!(
        METRICS_ID_INGESTION_BUSY,
        metrics::Unit::Count,
        "Number of ingestion jobs rejected because the driver lock was held"
    );

    metrics::describe_histogram!(
        METRICS_ID_INGESTION_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of completed ingestion jobs"
    );

    metrics::describe_gauge!(
        METRICS_ID_WS_CONNECTIONS_OPEN,
        metrics::Unit::Count,
        "Number of websocket connections currently registered"
    );

    metrics::describe_counter!(
        METRICS_ID_PUSH_GONE_REAPED,
        metrics::Unit::Count,
        "Number of connection records reaped after a gone delivery"
    );

    metrics::describe_counter!(
        METRICS_ID_QUEUE_RETRIES,
        metrics::Unit::Count,
        "Number of queue messages re-queued with a visibility back-off"
    );

    metrics::describe_gauge!(
        METRICS_ID_RATELIMIT_REMAINING,
        metrics::Unit::Count,
        "Remaining upstream rate-limit quota, per endpoint"
    );
}
