//! Batch worker: receives notification requests from the queue and runs
//! each through the fan-out processor.
//!
//! Items of a batch run concurrently, each under its own timeout. A
//! successful item is acknowledged; a failed, malformed or timed-out item is
//! released for redelivery, so only the failed subset of a batch comes back.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;

use herald_common::error::AppError;
use herald_common::types::NotificationRequest;
use herald_engine::processor::{FanOutProcessor, ProcessingReport};

use crate::queue::{NotificationQueue, QueueMessage};

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Malformed notification request: {0}")]
    Malformed(String),

    #[error("Processing timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Processing(#[from] AppError),
}

/// Counts of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub item_timeout: Duration,
}

pub struct BatchWorker {
    queue: Arc<dyn NotificationQueue>,
    processor: Arc<FanOutProcessor>,
    config: WorkerConfig,
}

impl BatchWorker {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        processor: Arc<FanOutProcessor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Poll until the task is cancelled. Queue errors are logged and retried
    /// after the poll interval.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            batch_size = self.config.batch_size,
            item_timeout_secs = self.config.item_timeout.as_secs(),
            "Batch worker started"
        );

        loop {
            match self.run_once().await {
                Ok(summary) if summary.received > 0 => {
                    tracing::info!(
                        received = summary.received,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        "Batch processed"
                    );
                }
                Ok(_) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive batch");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Receive and process one batch. Only the receive can fail the call;
    /// ack and release errors are counted against their item.
    pub async fn run_once(&self) -> Result<BatchSummary, AppError> {
        let messages = self.queue.receive(self.config.batch_size).await?;
        let mut summary = BatchSummary {
            received: messages.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for message in messages {
            let processor = self.processor.clone();
            let timeout = self.config.item_timeout;
            tasks.spawn(async move {
                let outcome = process_message(&processor, &message, timeout).await;
                (message, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (message, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The message stays in flight and returns after its
                    // visibility timeout.
                    tracing::error!(error = %e, "Batch item task panicked");
                    summary.failed += 1;
                    continue;
                }
            };

            match outcome {
                Ok(report) => {
                    tracing::debug!(
                        message_id = %message.id,
                        request_id = %report.request_id,
                        delivered = report.delivered,
                        failed = report.failed,
                        "Batch item done"
                    );
                    match self.queue.ack(&message.id).await {
                        Ok(()) => summary.succeeded += 1,
                        Err(e) => {
                            // Unacked, so it returns after its visibility timeout.
                            tracing::error!(message_id = %message.id, error = %e, "Failed to ack batch item");
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        receive_count = message.receive_count,
                        transient = e.is_transient(),
                        error = %e,
                        "Batch item failed, releasing for redelivery"
                    );
                    if let Err(e) = self.queue.release(&message.id).await {
                        tracing::error!(message_id = %message.id, error = %e, "Failed to release batch item");
                    }
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

impl ItemError {
    /// Infrastructure failures that a later receive may not hit again.
    pub fn is_transient(&self) -> bool {
        match self {
            ItemError::Malformed(_) => false,
            ItemError::TimedOut(_) => true,
            ItemError::Processing(e) => e.is_transient(),
        }
    }
}

/// Decode a queue body into a request.
pub fn decode_request(body: &str) -> Result<NotificationRequest, ItemError> {
    let request: NotificationRequest =
        serde_json::from_str(body).map_err(|e| ItemError::Malformed(e.to_string()))?;
    if request.id.is_empty() {
        return Err(ItemError::Malformed("id is required".to_string()));
    }
    Ok(request)
}

async fn process_message(
    processor: &FanOutProcessor,
    message: &QueueMessage,
    timeout: Duration,
) -> Result<ProcessingReport, ItemError> {
    let request = decode_request(&message.body)?;
    match tokio::time::timeout(timeout, processor.process(&request)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ItemError::TimedOut(timeout)),
    }
}
