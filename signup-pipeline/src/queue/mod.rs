//! Durable work queue between the intake gate and the notification worker.
//!
//! ```text
//! Intake Gate → enqueue → [signup queue] → receive/lease → Worker
//!                                              │
//!                                              ├→ acknowledge (done)
//!                                              ├→ release (redeliver later)
//!                                              └→ dead_letter (terminal)
//! ```
//!
//! Delivery is at-least-once with no ordering guarantee. After
//! `max_receive_count` deliveries the queue dead-letters a message itself.

pub mod amqp;
pub mod memory;

use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub use amqp::AmqpQueue;
pub use memory::MemoryQueue;

/// Identifier the queue assigns (or keeps) for an enqueued message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message currently leased to one consumer.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub message_id: MessageId,
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery
    pub receive_count: u32,
    /// Binding-specific lease handle (AMQP delivery tag, memory lease id)
    pub lease: u64,
}

/// Record written to the dead-letter destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub reason: String,
    pub receive_count: u32,
    /// Unix epoch seconds
    pub failed_at: u64,
}

impl DeadLetter {
    pub fn new(message: &LeasedMessage, reason: &str) -> Self {
        Self {
            message_id: message.message_id.to_string(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
            reason: reason.to_string(),
            receive_count: message.receive_count,
            failed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Operations the pipeline consumes from the durable queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a message. `message_id` should be content-derived.
    async fn enqueue(&self, message_id: &str, payload: &[u8]) -> Result<MessageId, QueueError>;

    /// Lease up to `max_count` messages.
    async fn receive(&self, max_count: usize) -> Result<Vec<LeasedMessage>, QueueError>;

    /// Remove a leased message permanently.
    async fn acknowledge(&self, message: &LeasedMessage) -> Result<(), QueueError>;

    /// Give the lease back so the message is redelivered later.
    async fn release(&self, message: &LeasedMessage) -> Result<(), QueueError>;

    /// Record the message to the dead-letter destination, then remove it.
    async fn dead_letter(&self, message: &LeasedMessage, reason: &str) -> Result<(), QueueError>;

    /// Hand back every lease this consumer still holds.
    ///
    /// Called after a receive or settle call failed partway. Bindings whose
    /// leases expire on their own keep the default no-op.
    async fn abandon_leases(&self) {}
}

/// Run a queue operation with a deadline.
pub async fn bounded<T, F>(timeout: Duration, operation: F) -> Result<T, QueueError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::Timeout(timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_record() {
        let message = LeasedMessage {
            message_id: MessageId("abc".to_string()),
            body: br#"{"name":"Ana"}"#.to_vec(),
            receive_count: 3,
            lease: 9,
        };

        let record = DeadLetter::new(&message, "integrity");

        assert_eq!(record.message_id, "abc");
        assert_eq!(record.body, r#"{"name":"Ana"}"#);
        assert_eq!(record.reason, "integrity");
        assert_eq!(record.receive_count, 3);
        assert!(record.failed_at > 0);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), QueueError> =
            bounded(Duration::from_millis(10), std::future::pending()).await;
        assert!(matches!(result, Err(QueueError::Timeout(10))));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, QueueError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
