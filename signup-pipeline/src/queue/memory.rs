//! In-process queue with leases, receive counts and a dead-letter list.
//!
//! Mirrors the broker contract closely enough to exercise the worker's
//! partial-failure handling without a running broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{DeadLetter, LeasedMessage, MessageId, WorkQueue};
use crate::error::QueueError;

struct Entry {
    message_id: MessageId,
    body: Vec<u8>,
    receive_count: u32,
    /// Active lease id and its expiry
    lease: Option<(u64, Instant)>,
}

impl Entry {
    fn is_available(&self, now: Instant) -> bool {
        match self.lease {
            None => true,
            Some((_, expires)) => expires <= now,
        }
    }

    fn holds(&self, lease: u64) -> bool {
        matches!(self.lease, Some((id, _)) if id == lease)
    }
}

#[derive(Default)]
struct State {
    entries: VecDeque<Entry>,
    dead_letters: Vec<DeadLetter>,
    next_lease: u64,
}

/// Memory-backed [`WorkQueue`].
pub struct MemoryQueue {
    state: Mutex<State>,
    max_receive_count: u32,
    lease_duration: Duration,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new(max_receive_count: u32, lease_duration: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_receive_count: max_receive_count.max(1),
            lease_duration,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Messages not yet acknowledged or dead-lettered, leased or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages currently under an unexpired lease.
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| !e.is_available(now))
            .count()
    }

    /// Raw bodies of messages still in the queue, oldest first.
    pub async fn bodies(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .map(|e| e.body.clone())
            .collect()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("memory queue offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, message_id: &str, payload: &[u8]) -> Result<MessageId, QueueError> {
        self.check_available()?;

        let message_id = MessageId(message_id.to_string());
        self.state.lock().await.entries.push_back(Entry {
            message_id: message_id.clone(),
            body: payload.to_vec(),
            receive_count: 0,
            lease: None,
        });

        Ok(message_id)
    }

    async fn receive(&self, max_count: usize) -> Result<Vec<LeasedMessage>, QueueError> {
        self.check_available()?;

        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let mut leased = Vec::new();
        let mut kept = VecDeque::with_capacity(state.entries.len());

        for mut entry in std::mem::take(&mut state.entries) {
            if leased.len() >= max_count || !entry.is_available(now) {
                kept.push_back(entry);
                continue;
            }

            if entry.receive_count >= self.max_receive_count {
                warn!(
                    message_id = %entry.message_id,
                    receive_count = entry.receive_count,
                    "memory_queue_delivery_limit_reached"
                );
                let message = LeasedMessage {
                    message_id: entry.message_id,
                    body: entry.body,
                    receive_count: entry.receive_count,
                    lease: 0,
                };
                state
                    .dead_letters
                    .push(DeadLetter::new(&message, "max receive count exceeded"));
                continue;
            }

            state.next_lease += 1;
            entry.receive_count += 1;
            entry.lease = Some((state.next_lease, now + self.lease_duration));

            leased.push(LeasedMessage {
                message_id: entry.message_id.clone(),
                body: entry.body.clone(),
                receive_count: entry.receive_count,
                lease: state.next_lease,
            });
            kept.push_back(entry);
        }

        state.entries = kept;
        Ok(leased)
    }

    async fn acknowledge(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        let index = state
            .entries
            .iter()
            .position(|e| e.holds(message.lease))
            .ok_or(QueueError::UnknownLease(message.lease))?;
        state.entries.remove(index);

        Ok(())
    }

    async fn release(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.holds(message.lease))
            .ok_or(QueueError::UnknownLease(message.lease))?;
        entry.lease = None;

        Ok(())
    }

    async fn dead_letter(&self, message: &LeasedMessage, reason: &str) -> Result<(), QueueError> {
        self.check_available()?;

        let mut state = self.state.lock().await;
        let index = state
            .entries
            .iter()
            .position(|e| e.holds(message.lease))
            .ok_or(QueueError::UnknownLease(message.lease))?;
        state.entries.remove(index);
        state.dead_letters.push(DeadLetter::new(message, reason));

        info!(message_id = %message.message_id, reason = reason, "memory_queue_dead_lettered");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MemoryQueue {
        MemoryQueue::new(3, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_receive_leases_up_to_max_count() {
        let queue = queue();
        for i in 0..5 {
            queue.enqueue(&format!("m{i}"), b"{}").await.unwrap();
        }

        let batch = queue.receive(3).await.unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].message_id, MessageId("m0".to_string()));
        assert!(batch.iter().all(|m| m.receive_count == 1));
        assert_eq!(queue.in_flight().await, 3);

        // Leased messages are not handed out twice
        let rest = queue.receive(10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(queue.receive(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_removes_message() {
        let queue = queue();
        queue.enqueue("m1", b"{}").await.unwrap();

        let batch = queue.receive(1).await.unwrap();
        queue.acknowledge(&batch[0]).await.unwrap();

        assert!(queue.is_empty().await);
        assert!(matches!(
            queue.acknowledge(&batch[0]).await,
            Err(QueueError::UnknownLease(_))
        ));
    }

    #[tokio::test]
    async fn test_release_allows_redelivery() {
        let queue = queue();
        queue.enqueue("m1", b"{}").await.unwrap();

        let first = queue.receive(1).await.unwrap();
        queue.release(&first[0]).await.unwrap();

        let second = queue.receive(1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].lease, first[0].lease);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::new(3, Duration::ZERO);
        queue.enqueue("m1", b"{}").await.unwrap();

        let first = queue.receive(1).await.unwrap();
        let second = queue.receive(1).await.unwrap();

        assert_eq!(second[0].receive_count, 2);
        // The stale lease can no longer settle the message
        assert!(queue.acknowledge(&first[0]).await.is_err());
        assert!(queue.acknowledge(&second[0]).await.is_ok());
    }

    #[tokio::test]
    async fn test_max_receive_count_dead_letters() {
        let queue = queue();
        queue.enqueue("m1", b"payload").await.unwrap();

        for _ in 0..3 {
            let batch = queue.receive(1).await.unwrap();
            assert_eq!(batch.len(), 1);
            queue.release(&batch[0]).await.unwrap();
        }

        assert!(queue.receive(1).await.unwrap().is_empty());
        assert!(queue.is_empty().await);

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id, "m1");
        assert_eq!(dead[0].body, "payload");
        assert_eq!(dead[0].receive_count, 3);
    }

    #[tokio::test]
    async fn test_dead_letter_records_and_removes() {
        let queue = queue();
        queue.enqueue("m1", b"bad").await.unwrap();

        let batch = queue.receive(1).await.unwrap();
        queue.dead_letter(&batch[0], "poison").await.unwrap();

        assert!(queue.is_empty().await);
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "poison");
    }

    #[tokio::test]
    async fn test_unavailable_queue_rejects_enqueue() {
        let queue = queue();
        queue.set_unavailable(true);

        assert!(matches!(
            queue.enqueue("m1", b"{}").await,
            Err(QueueError::Unavailable(_))
        ));
        queue.set_unavailable(false);
        assert!(queue.enqueue("m1", b"{}").await.is_ok());
    }
}
