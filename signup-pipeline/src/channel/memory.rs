//! In-process notification channel.
//!
//! Records every successful publish and lets tests script failures per
//! recipient, including publishes that never complete.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{NotificationChannel, PublishId};
use crate::error::PublishError;
use crate::signup::NotificationMessage;

/// Scripted behaviour for one recipient.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the next `remaining` publishes with this error.
    Fail { error: PublishError, remaining: usize },
    /// Never complete, so the caller's timeout fires.
    Stall,
}

#[derive(Default)]
struct State {
    published: Vec<(String, NotificationMessage)>,
    faults: HashMap<String, Fault>,
}

/// Memory-backed [`NotificationChannel`].
#[derive(Default)]
pub struct MemoryChannel {
    state: Mutex<State>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` publishes to `recipient`.
    pub async fn fail_recipient(&self, recipient: &str, error: PublishError, times: usize) {
        self.state.lock().await.faults.insert(
            recipient.to_string(),
            Fault::Fail {
                error,
                remaining: times,
            },
        );
    }

    /// Make every publish to `recipient` hang.
    pub async fn stall_recipient(&self, recipient: &str) {
        self.state
            .lock()
            .await
            .faults
            .insert(recipient.to_string(), Fault::Stall);
    }

    /// Every successfully published message, in publish order.
    pub async fn published(&self) -> Vec<NotificationMessage> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<NotificationMessage> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// What a deduplicating subscriber would deliver: first message per key.
    pub async fn deduplicated(&self) -> Vec<NotificationMessage> {
        let mut seen = HashSet::new();
        self.published()
            .await
            .into_iter()
            .filter(|m| seen.insert(m.idempotency_key.clone()))
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    async fn publish(
        &self,
        topic: &str,
        message: &NotificationMessage,
    ) -> Result<PublishId, PublishError> {
        let stalled = {
            let mut state = self.state.lock().await;
            match state.faults.get_mut(&message.recipient_email) {
                Some(Fault::Stall) => true,
                Some(Fault::Fail { error, remaining }) if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(error.clone());
                }
                Some(Fault::Fail { .. }) => {
                    state.faults.remove(&message.recipient_email);
                    false
                }
                None => false,
            }
        };

        if stalled {
            return std::future::pending().await;
        }

        let mut state = self.state.lock().await;
        state.published.push((topic.to_string(), message.clone()));
        Ok(PublishId(format!("pub-{}", state.published.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(recipient: &str, key: &str) -> NotificationMessage {
        NotificationMessage {
            subject: "Welcome to Our Platform!".to_string(),
            body: "Hello, welcome to our platform!".to_string(),
            recipient_email: recipient.to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_records_message() {
        let channel = MemoryChannel::new();

        let id = channel
            .publish("welcome", &message("ana@x.com", "k1"))
            .await
            .unwrap();

        assert_eq!(id, PublishId("pub-1".to_string()));
        assert_eq!(channel.published_to("welcome").await.len(), 1);
        assert!(channel.published_to("other").await.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failure_then_success() {
        let channel = MemoryChannel::new();
        channel
            .fail_recipient("ana@x.com", PublishError::Transient("down".into()), 1)
            .await;

        let first = channel.publish("welcome", &message("ana@x.com", "k1")).await;
        assert!(matches!(first, Err(PublishError::Transient(_))));

        let second = channel.publish("welcome", &message("ana@x.com", "k1")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_stalled_publish_never_completes() {
        let channel = MemoryChannel::new();
        channel.stall_recipient("slow@x.com").await;

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            channel.publish("welcome", &message("slow@x.com", "k1")),
        )
        .await;

        assert!(result.is_err());
        assert!(channel.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_deduplicated_view() {
        let channel = MemoryChannel::new();
        channel.publish("welcome", &message("ana@x.com", "k1")).await.unwrap();
        channel.publish("welcome", &message("ana@x.com", "k1")).await.unwrap();
        channel.publish("welcome", &message("bob@x.com", "k2")).await.unwrap();

        assert_eq!(channel.published().await.len(), 3);
        assert_eq!(channel.deduplicated().await.len(), 2);
    }
}
