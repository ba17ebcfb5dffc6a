//! Worker pump: receives queue messages and drives the ingestion engine.
//!
//! Each message runs through the composed wrappers, outside-in:
//!
//! 1. a per-message tracing span binding message id and driver id,
//! 2. a panic guard that recovers panics as errors (keeping the original
//!    error identity when the panic payload is an [`IngestError`]),
//! 3. deadline reduction by the configured buffer, failing fast before the
//!    handler when the buffer exceeds the remaining budget,
//! 4. visibility reset on retryable failure, computed by the pluggable
//!    [`VisibilityTimeoutPolicy`].
//!
//! Upstream-unauthorized failures are non-retryable: the message is neither
//! deleted nor re-queued, so the transport's redrive policy dead-letters
//! it. Unparseable bodies are logged and acknowledged.

use std::{any::Any, sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable as _};
use futures::FutureExt as _;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use pitwall_types::events::IngestionJob;

use crate::{
    deadline::Deadline,
    metrics::METRICS_ID_QUEUE_RETRIES,
    services::{
        ingestion::{IngestError, IngestionEngine, IngestionOutcome},
        queue::{EventQueueService, QueueMessage, VisibilityTimeoutPolicy},
    },
};

/// Pause between polls when the queue is empty.
const IDLE_WAIT: Duration = Duration::from_secs(1);
/// Pause after the receive retries are exhausted.
const RECEIVE_FAILURE_WAIT: Duration = Duration::from_secs(5);

/// The queue worker.
pub struct Worker {
    queue: EventQueueService,
    engine: Arc<IngestionEngine>,
    visibility: Arc<dyn VisibilityTimeoutPolicy>,
    job_timeout: Duration,
    deadline_buffer: Duration,
}

impl Worker {
    /// Creates the worker.
    pub fn new(
        queue: EventQueueService,
        engine: Arc<IngestionEngine>,
        visibility: Arc<dyn VisibilityTimeoutPolicy>,
        job_timeout: Duration,
        deadline_buffer: Duration,
    ) -> Self {
        Self {
            queue,
            engine,
            visibility,
            job_timeout,
            deadline_buffer,
        }
    }

    /// The receive loop. Runs until the token is cancelled.
    pub async fn run(self, cancellation_token: CancellationToken) -> eyre::Result<()> {
        tracing::info!("worker pump started");
        loop {
            let batch = tokio::select! {
                batch = self.receive_with_retry() => batch,
                _ = cancellation_token.cancelled() => break,
            };
            match batch {
                Ok(batch) if batch.is_empty() => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_WAIT) => {}
                        _ = cancellation_token.cancelled() => break,
                    }
                }
                Ok(batch) => {
                    for message in batch {
                        if cancellation_token.is_cancelled() {
                            break;
                        }
                        self.process_message(message).await;
                    }
                }
                Err(err) => {
                    tracing::error!("queue receive kept failing: {err:?}");
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_FAILURE_WAIT) => {}
                        _ = cancellation_token.cancelled() => break,
                    }
                }
            }
        }
        tracing::info!("worker pump stopped");
        Ok(())
    }

    async fn receive_with_retry(&self) -> eyre::Result<Vec<QueueMessage>> {
        (|| self.queue.receive())
            .retry(ExponentialBuilder::default().with_max_times(5))
            .notify(|err, after| {
                tracing::warn!("queue receive failed (retrying in {after:?}): {err:?}")
            })
            .await
    }

    /// Processes one message under its own span.
    pub async fn process_message(&self, message: QueueMessage) {
        let span = tracing::info_span!(
            "ingestion_message",
            message_id = %message.message_id,
            driver_id = tracing::field::Empty,
        );
        self.process_message_inner(&message).instrument(span).await
    }

    async fn process_message_inner(&self, message: &QueueMessage) {
        let job: IngestionJob = match serde_json::from_str(&message.body) {
            Ok(job) => job,
            Err(err) => {
                // skipped, not re-queued
                tracing::warn!("dropping unparseable message body: {err}");
                if let Err(delete_err) = self.queue.delete(&message.receipt_handle).await {
                    tracing::error!("could not delete unparseable message: {delete_err:?}");
                }
                return;
            }
        };
        tracing::Span::current().record("driver_id", tracing::field::display(job.driver_id));

        match self.run_handler(&job).await {
            Ok(outcome) => {
                if matches!(outcome, IngestionOutcome::Busy) {
                    tracing::info!("driver already being ingested, acknowledging message");
                }
                if let Err(err) = self.queue.delete(&message.receipt_handle).await {
                    tracing::error!("could not delete finished message: {err:?}");
                }
            }
            Err(err) if err.is_unauthorized() => {
                // neither deleted nor re-queued: the transport's redrive
                // policy moves it to the dead-letter queue
                tracing::error!("job failed with upstream-unauthorized: {err}");
            }
            Err(err) => {
                let timeout = self.visibility.compute(&message.approximate_receive_count);
                tracing::warn!("job failed, visible again in {timeout:?}: {err}");
                ::metrics::counter!(METRICS_ID_QUEUE_RETRIES).increment(1);
                if let Err(visibility_err) = self
                    .queue
                    .change_visibility(&message.receipt_handle, timeout)
                    .await
                {
                    // log only; the original error stays the story
                    tracing::error!("could not reset message visibility: {visibility_err:?}");
                }
            }
        }
    }

    /// Deadline reduction + panic guard around the engine.
    async fn run_handler(&self, job: &IngestionJob) -> Result<IngestionOutcome, IngestError> {
        let deadline = Deadline::after(self.job_timeout)
            .reduced(self.deadline_buffer)
            .map_err(|err| IngestError::Internal(err.to_string()))?;
        match std::panic::AssertUnwindSafe(self.engine.ingest_races(job, deadline))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(recover_panic(panic)),
        }
    }
}

/// Turns a panic payload back into an error, preserving a panicked
/// [`IngestError`] untouched.
fn recover_panic(panic: Box<dyn Any + Send>) -> IngestError {
    match panic.downcast::<IngestError>() {
        Ok(err) => *err,
        Err(panic) => match panic.downcast::<String>() {
            Ok(message) => IngestError::Internal(format!("handler panicked: {message}")),
            Err(panic) => match panic.downcast::<&'static str>() {
                Ok(message) => IngestError::Internal(format!("handler panicked: {message}")),
                Err(_) => IngestError::Internal("handler panicked".to_owned()),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_iracing::UpstreamError;

    #[test]
    fn panicked_error_keeps_its_identity() {
        let err = recover_panic(Box::new(IngestError::Upstream(UpstreamError::Unauthorized)));
        assert!(err.is_unauthorized());
    }

    #[test]
    fn panic_messages_are_wrapped() {
        let err = recover_panic(Box::new("boom"));
        assert!(err.to_string().contains("boom"));
        let err = recover_panic(Box::new("boom".to_owned()));
        assert!(err.to_string().contains("boom"));
    }
}
