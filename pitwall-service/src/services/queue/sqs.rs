//! SQS implementation of [`EventQueue`].
//!
//! The queue is addressed by ARN in configuration; at init the ARN is
//! parsed into owner account and queue name to look up the queue URL. The
//! queue is expected to be FIFO with a redrive policy: messages the worker
//! neither deletes nor re-queues dead-letter once the transport's max
//! receive count is reached.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use eyre::Context as _;
use tracing::instrument;
use uuid::Uuid;

use pitwall_types::events::IngestionJob;

use crate::services::queue::{EventQueue, QueueMessage, parse_queue_arn};

/// Max messages fetched per receive call.
const MAX_BATCH: i32 = 10;
/// Long-poll wait of a single receive call.
const RECEIVE_WAIT_SECS: i32 = 10;

/// SQS-backed ingestion job queue.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    /// Resolves the queue URL from the configured ARN and wraps the client.
    #[instrument(level = "info", skip_all, fields(arn))]
    pub async fn from_arn(aws_config: &aws_config::SdkConfig, arn: &str) -> eyre::Result<Self> {
        let queue_arn = parse_queue_arn(arn)?;
        let client = aws_sdk_sqs::Client::new(aws_config);
        tracing::info!("resolving queue url for {}..", queue_arn.name);
        let queue_url = client
            .get_queue_url()
            .queue_name(&queue_arn.name)
            .queue_owner_aws_account_id(&queue_arn.account_id)
            .send()
            .await
            .context("while resolving queue url")?
            .queue_url()
            .ok_or_else(|| eyre::eyre!("queue url lookup returned nothing"))?
            .to_owned();
        Ok(Self { client, queue_url })
    }
}

#[async_trait]
impl EventQueue for SqsQueue {
    async fn publish(&self, job: &IngestionJob) -> eyre::Result<()> {
        let body = serde_json::to_string(job)?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            // serialize work per driver even under concurrency
            .message_group_id(job.driver_id.to_string())
            .message_deduplication_id(Uuid::new_v4().to_string())
            .send()
            .await
            .context("while publishing ingestion job")?;
        Ok(())
    }

    async fn receive(&self) -> eyre::Result<Vec<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(MAX_BATCH)
            .wait_time_seconds(RECEIVE_WAIT_SECS)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .context("while receiving messages")?;
        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|message| QueueMessage {
                message_id: message.message_id.clone().unwrap_or_default(),
                receipt_handle: message.receipt_handle.clone().unwrap_or_default(),
                body: message.body.clone().unwrap_or_default(),
                approximate_receive_count: message
                    .attributes
                    .as_ref()
                    .and_then(|attributes| {
                        attributes.get(&MessageSystemAttributeName::ApproximateReceiveCount)
                    })
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> eyre::Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("while deleting message")?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> eyre::Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(timeout.as_secs().min(i32::MAX as u64) as i32)
            .send()
            .await
            .context("while changing message visibility")?;
        Ok(())
    }
}
