//! Notification worker - turns leased work items into published welcomes.
//!
//! Each item in a batch is handled independently and concurrently:
//!
//! ```text
//! Received → Validated → Published → Acknowledged
//! Received → Failed → DeadLettered          (integrity / permanent / poison)
//! Received → Validated → Released           (transient, redelivered later)
//! ```
//!
//! An item is settled only once its publish outcome is known, and no item's
//! settlement waits on a sibling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::channel::{NotificationChannel, PublishId};
use crate::error::{ProcessError, QueueError};
use crate::queue::{bounded, LeasedMessage, WorkQueue};
use crate::signup::{is_valid_email, normalize_email, NotificationMessage, WorkItem};
use crate::Config;

/// Worker tuning taken from [`Config`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub topic: String,
    pub batch_size: usize,
    pub operation_timeout: Duration,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            topic: config.welcome_topic.clone(),
            batch_size: config.batch_size,
            operation_timeout: config.operation_timeout(),
        }
    }
}

/// Final state of one item within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledged,
    DeadLettered,
    /// Transient failure; left for the queue to redeliver.
    Released,
    /// The settle call itself failed; the worker hands the lease back after
    /// the batch so the queue redelivers.
    Unsettled,
}

/// Counts of item outcomes for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub acknowledged: usize,
    pub dead_lettered: usize,
    pub released: usize,
    pub unsettled: usize,
}

impl BatchReport {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Acknowledged => self.acknowledged += 1,
            Disposition::DeadLettered => self.dead_lettered += 1,
            Disposition::Released => self.released += 1,
            Disposition::Unsettled => self.unsettled += 1,
        }
    }
}

pub struct NotificationWorker {
    queue: Arc<dyn WorkQueue>,
    channel: Arc<dyn NotificationChannel>,
    settings: WorkerSettings,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        channel: Arc<dyn NotificationChannel>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            channel,
            settings,
        }
    }

    /// Lease one batch and settle every item in it.
    pub async fn run_cycle(&self) -> Result<BatchReport, QueueError> {
        let batch = match bounded(
            self.settings.operation_timeout,
            self.queue.receive(self.settings.batch_size),
        )
        .await
        {
            Ok(batch) => batch,
            Err(e) => {
                // A receive cut off mid-fetch may already hold leases
                if matches!(e, QueueError::Timeout(_)) {
                    self.queue.abandon_leases().await;
                }
                return Err(e);
            }
        };

        let mut report = BatchReport {
            received: batch.len(),
            ..Default::default()
        };

        if batch.is_empty() {
            return Ok(report);
        }

        let dispositions = join_all(batch.iter().map(|message| self.handle(message))).await;
        for disposition in dispositions {
            report.record(disposition);
        }

        if report.unsettled > 0 {
            warn!(unsettled = report.unsettled, "worker_abandoning_leases");
            self.queue.abandon_leases().await;
        }

        info!(
            received = report.received,
            acknowledged = report.acknowledged,
            dead_lettered = report.dead_lettered,
            released = report.released,
            unsettled = report.unsettled,
            "worker_batch_complete"
        );

        Ok(report)
    }

    /// Process and settle a single leased message.
    pub async fn handle(&self, message: &LeasedMessage) -> Disposition {
        info!(
            message_id = %message.message_id,
            receive_count = message.receive_count,
            "worker_item_received"
        );

        let outcome = match prepare(message) {
            Ok(notification) => self.publish(&notification).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(publish_id) => {
                info!(
                    message_id = %message.message_id,
                    publish_id = %publish_id,
                    "worker_item_published"
                );
                self.settle(message, Disposition::Acknowledged, self.queue.acknowledge(message))
                    .await
            }
            Err(e) if e.is_terminal() => {
                error!(
                    message_id = %message.message_id,
                    error = %e,
                    "worker_item_failed"
                );
                let reason = e.to_string();
                self.settle(
                    message,
                    Disposition::DeadLettered,
                    self.queue.dead_letter(message, &reason),
                )
                .await
            }
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error = %e,
                    "worker_item_deferred"
                );
                self.settle(message, Disposition::Released, self.queue.release(message))
                    .await
            }
        }
    }

    async fn publish(&self, notification: &NotificationMessage) -> Result<PublishId, ProcessError> {
        let timeout = self.settings.operation_timeout;
        match tokio::time::timeout(
            timeout,
            self.channel.publish(&self.settings.topic, notification),
        )
        .await
        {
            Ok(result) => result.map_err(ProcessError::from),
            Err(_) => Err(ProcessError::PublishTransient(format!(
                "publish timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Run a settle call with the operation timeout; failures are logged only.
    async fn settle(
        &self,
        message: &LeasedMessage,
        disposition: Disposition,
        call: impl Future<Output = Result<(), QueueError>>,
    ) -> Disposition {
        match bounded(self.settings.operation_timeout, call).await {
            Ok(()) => {
                info!(
                    message_id = %message.message_id,
                    disposition = ?disposition,
                    "worker_item_settled"
                );
                disposition
            }
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    disposition = ?disposition,
                    error = %e,
                    "worker_settle_failed"
                );
                Disposition::Unsettled
            }
        }
    }
}

/// Decode, verify and validate a leased item into its notification.
pub fn prepare(message: &LeasedMessage) -> Result<NotificationMessage, ProcessError> {
    let item: WorkItem = serde_json::from_slice(&message.body)
        .map_err(|e| ProcessError::MalformedInput(e.to_string()))?;

    // The gate only ever enqueues normalized addresses
    if item.email != normalize_email(&item.email) || !item.key_matches() {
        return Err(ProcessError::IntegrityError { email: item.email });
    }

    if !is_valid_email(&item.email) {
        return Err(ProcessError::PublishPermanent(format!(
            "invalid recipient {}",
            item.email
        )));
    }

    Ok(NotificationMessage::welcome(&item))
}
