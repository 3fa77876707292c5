//! Fan-out channel welcome notifications are published to.
//!
//! Delivery to subscribers is at-least-once; the channel does no dedup.
//! Subscribers recognise repeats by `idempotency_key`.

pub mod amqp;
pub mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::signup::NotificationMessage;

pub use amqp::AmqpFanout;
pub use memory::MemoryChannel;

/// Identifier of one successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublishId(pub String);

impl fmt::Display for PublishId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Publish `message` to every subscriber of `topic`.
    async fn publish(
        &self,
        topic: &str,
        message: &NotificationMessage,
    ) -> Result<PublishId, PublishError>;
}
