//! Durable ingestion-job queue.
//!
//! This module defines the [`EventQueue`] trait used by the REST edge to
//! enqueue jobs and by the worker pump to receive, delete, and re-queue
//! them, plus the pluggable [`VisibilityTimeoutPolicy`] governing retry
//! back-off.
//!
//! Current `EventQueue` implementations:
//! - SQS (FIFO, production)
//! - Memory (dev environment and tests)

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use pitwall_types::events::IngestionJob;

pub mod memory;
#[cfg(feature = "aws")]
pub mod sqs;

/// Dynamic trait object for the event queue.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type EventQueueService = Arc<dyn EventQueue + Send + Sync>;

/// A received queue message.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Transport message id, for log correlation.
    pub message_id: String,
    /// Handle for delete/visibility operations on this delivery.
    pub receipt_handle: String,
    /// The JSON-serialized [`IngestionJob`].
    pub body: String,
    /// The delivery counter, as the raw string attribute the transport
    /// reports. May be empty or non-numeric; policies treat both as a first
    /// delivery.
    pub approximate_receive_count: String,
}

/// Trait that queue backends must provide.
#[async_trait]
pub trait EventQueue {
    /// Enqueues a job. Work is partitioned by driver id so a single
    /// driver's jobs serialize even under concurrency.
    async fn publish(&self, job: &IngestionJob) -> eyre::Result<()>;

    /// Receives a batch of messages. May return an empty batch.
    async fn receive(&self) -> eyre::Result<Vec<QueueMessage>>;

    /// Deletes a message by receipt handle, acknowledging it.
    async fn delete(&self, receipt_handle: &str) -> eyre::Result<()>;

    /// Makes a received message visible again after `timeout`.
    async fn change_visibility(&self, receipt_handle: &str, timeout: Duration)
    -> eyre::Result<()>;
}

/// Computes the visibility timeout applied to a message after a handler
/// failure.
pub trait VisibilityTimeoutPolicy: Send + Sync {
    /// Maps the transport's receive-count attribute to a back-off duration.
    fn compute(&self, approximate_receive_count: &str) -> Duration;
}

/// Linear back-off: `step * (receive_count - 1)`, bounded at zero.
///
/// A missing or non-numeric receive count is treated as a first delivery.
#[derive(Debug, Clone, Copy)]
pub struct LinearVisibilityTimeout {
    step: Duration,
}

impl LinearVisibilityTimeout {
    /// Creates the policy with the given step.
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl VisibilityTimeoutPolicy for LinearVisibilityTimeout {
    fn compute(&self, approximate_receive_count: &str) -> Duration {
        let receive_count: u32 = approximate_receive_count.parse().unwrap_or(0);
        self.step * receive_count.saturating_sub(1)
    }
}

/// The `(account id, queue name)` pair extracted from a queue ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueArn {
    /// The owning AWS account id.
    pub account_id: String,
    /// The queue name.
    pub name: String,
}

/// Parses `arn:aws:sqs:<region>:<account>:<name>` into its account id and
/// queue name, which are what the queue-URL lookup needs.
pub fn parse_queue_arn(arn: &str) -> eyre::Result<QueueArn> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        eyre::bail!("invalid queue ARN: {arn}");
    }
    Ok(QueueArn {
        account_id: parts[4].to_owned(),
        name: parts[5].to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_visibility_timeout_from_receive_counts() {
        let policy = LinearVisibilityTimeout::new(Duration::from_secs(30));
        let cases = [
            ("1", Duration::ZERO),
            ("2", Duration::from_secs(30)),
            ("3", Duration::from_secs(60)),
            ("", Duration::ZERO),
            ("not-a-number", Duration::ZERO),
        ];
        for (count, expected) in cases {
            assert_eq!(policy.compute(count), expected, "count {count:?}");
        }
    }

    #[test]
    fn parses_well_formed_queue_arn() {
        let arn = parse_queue_arn("arn:aws:sqs:us-east-1:123456789012:my-queue").unwrap();
        assert_eq!(
            arn,
            QueueArn {
                account_id: "123456789012".to_owned(),
                name: "my-queue".to_owned(),
            }
        );
    }

    #[test]
    fn rejects_malformed_queue_arns() {
        for arn in [
            "arn:aws:sqs:us-east-1:123456789012",
            "arn:aws:sqs:us-east-1:123456789012:my-queue:extra",
            "not-an-arn",
            "",
        ] {
            assert!(parse_queue_arn(arn).is_err(), "arn {arn:?}");
        }
    }
}
