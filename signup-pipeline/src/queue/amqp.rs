//! AMQP binding of the work queue.
//!
//! The signup queue is a quorum queue, so the broker tracks deliveries in the
//! `x-delivery-count` header and dead-letters a message itself once
//! `x-delivery-limit` is exceeded. Explicit dead-letters (poison or
//! permanently failing items) are published to the dead-letter queue as a
//! [`DeadLetter`] record before the original is acknowledged.
//!
//! Deliveries stay unacked until the channel closes, so a receive that fails
//! partway hands back what it already fetched, and
//! [`WorkQueue::abandon_leases`] closes the channel to requeue anything the
//! worker could not settle.

use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions},
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel,
};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{DeadLetter, LeasedMessage, MessageId, WorkQueue};
use crate::broker::Broker;
use crate::error::QueueError;

/// Work queue backed by the shared [`Broker`] channel.
#[derive(Clone)]
pub struct AmqpQueue {
    broker: Broker,
    /// Time a single `receive` may spend fetching before it returns what it has
    fetch_budget: Duration,
}

impl AmqpQueue {
    /// `operation_timeout` is the caller's deadline for each queue call;
    /// fetching stops at half of it so a slow broker yields a partial batch.
    pub fn new(broker: Broker, operation_timeout: Duration) -> Self {
        Self {
            broker,
            fetch_budget: operation_timeout / 2,
        }
    }

    async fn channel(&self) -> Result<Channel, QueueError> {
        self.broker
            .channel()
            .await
            .map_err(|e| QueueError::Unavailable(format!("{e:#}")))
    }

    /// Publish to a queue via the default exchange and wait for the broker confirm.
    async fn publish_confirmed(
        &self,
        queue: &str,
        message_id: &str,
        payload: &[u8],
    ) -> Result<(), QueueError> {
        let channel = self.channel().await?;

        let confirmation = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.into()),
            )
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?;

        if confirmation.is_nack() {
            return Err(QueueError::Unavailable(format!(
                "broker rejected publish to {queue}"
            )));
        }

        Ok(())
    }
}

fn unavailable(e: lapin::Error) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

/// Deliveries so far, counting this one.
///
/// Quorum queues report previous deliveries in `x-delivery-count`; classic
/// queues only expose the redelivered flag.
fn receive_count(delivery: &Delivery) -> u32 {
    let previous = delivery
        .properties
        .headers()
        .as_ref()
        .and_then(delivery_count_header);

    match previous {
        Some(n) => n.saturating_add(1),
        None if delivery.redelivered => 2,
        None => 1,
    }
}

fn delivery_count_header(headers: &FieldTable) -> Option<u32> {
    let (_, value) = headers
        .inner()
        .iter()
        .find(|(k, _)| k.as_str() == "x-delivery-count")?;

    let count = match value {
        AMQPValue::LongLongInt(n) => *n,
        AMQPValue::LongInt(n) => i64::from(*n),
        AMQPValue::LongUInt(n) => i64::from(*n),
        AMQPValue::ShortInt(n) => i64::from(*n),
        AMQPValue::ShortUInt(n) => i64::from(*n),
        _ => return None,
    };

    u32::try_from(count).ok()
}

#[async_trait]
impl WorkQueue for AmqpQueue {
    async fn enqueue(&self, message_id: &str, payload: &[u8]) -> Result<MessageId, QueueError> {
        let queue = &self.broker.topology().signup_queue;
        self.publish_confirmed(queue, message_id, payload).await?;

        info!(
            queue = %queue,
            message_id = %message_id,
            body_length = payload.len(),
            "amqp_signup_enqueued"
        );

        Ok(MessageId(message_id.to_string()))
    }

    async fn receive(&self, max_count: usize) -> Result<Vec<LeasedMessage>, QueueError> {
        let channel = self.channel().await?;
        let queue = &self.broker.topology().signup_queue;
        let deadline = Instant::now() + self.fetch_budget;

        let mut leased = Vec::with_capacity(max_count);
        while leased.len() < max_count {
            let fetch = channel.basic_get(queue, BasicGetOptions { no_ack: false });
            let message = match timeout_at(deadline, fetch).await {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => return partial_batch(leased, unavailable(e)),
                Err(_) => {
                    let waited = self.fetch_budget.as_millis() as u64;
                    return partial_batch(leased, QueueError::Timeout(waited));
                }
            };

            let Some(message) = message else {
                break;
            };

            let delivery = message.delivery;
            let message_id = delivery
                .properties
                .message_id()
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("delivery-{}", delivery.delivery_tag));

            leased.push(LeasedMessage {
                message_id: MessageId(message_id),
                receive_count: receive_count(&delivery),
                lease: delivery.delivery_tag,
                body: delivery.data,
            });
        }

        debug!(queue = %queue, count = leased.len(), "amqp_batch_received");

        Ok(leased)
    }

    async fn acknowledge(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        let channel = self.channel().await?;
        channel
            .basic_ack(message.lease, BasicAckOptions::default())
            .await
            .map_err(unavailable)
    }

    async fn release(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        let channel = self.channel().await?;
        channel
            .basic_nack(
                message.lease,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(unavailable)
    }

    async fn dead_letter(&self, message: &LeasedMessage, reason: &str) -> Result<(), QueueError> {
        let record = DeadLetter::new(message, reason);
        let body = serde_json::to_vec(&record)
            .map_err(|e| QueueError::Unavailable(format!("Failed to serialize dead letter: {e}")))?;

        let dead_letter_queue = &self.broker.topology().dead_letter_queue;
        self.publish_confirmed(dead_letter_queue, &record.message_id, &body)
            .await?;

        // Only settle the original once the record is safely stored
        self.acknowledge(message).await?;

        info!(
            queue = %dead_letter_queue,
            message_id = %message.message_id,
            reason = reason,
            "amqp_dead_lettered"
        );

        Ok(())
    }

    async fn abandon_leases(&self) {
        self.broker.discard_channel().await;
    }
}

/// Outcome of a fetch loop interrupted by `error`.
///
/// Messages already fetched are returned so the worker settles them; an
/// error is only reported when nothing was fetched.
fn partial_batch(
    leased: Vec<LeasedMessage>,
    error: QueueError,
) -> Result<Vec<LeasedMessage>, QueueError> {
    if leased.is_empty() {
        return Err(error);
    }

    warn!(count = leased.len(), error = %error, "amqp_batch_interrupted");
    Ok(leased)
}
