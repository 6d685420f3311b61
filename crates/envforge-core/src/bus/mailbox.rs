//! Per-agent mailbox — a bounded, priority-ordered inbox.
//!
//! Four FIFO rings, one per priority class. `recv` always drains the highest
//! non-empty class first, so an urgent message overtakes queued normal
//! traffic while ordering within a class stays FIFO. A full mailbox blocks
//! the sender cooperatively until space frees or the mailbox closes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use super::queue::BusError;
use super::types::{AgentMessage, MessagePriority};

/// Soft cap on queued messages per mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Priority classes, highest first. Index into the ring array.
const PRIORITY_ORDER: [MessagePriority; 4] = [
    MessagePriority::Urgent,
    MessagePriority::High,
    MessagePriority::Normal,
    MessagePriority::Low,
];

fn slot(priority: MessagePriority) -> usize {
    PRIORITY_ORDER
        .iter()
        .position(|p| *p == priority)
        .unwrap_or(2)
}

// ─────────────────────────────────────────────
// Mailbox
// ─────────────────────────────────────────────

/// A single agent's inbox. Exactly one consumer (the owning agent's loop);
/// any number of producers via the bus.
pub struct Mailbox {
    agent_id: String,
    rings: Mutex<[VecDeque<AgentMessage>; 4]>,
    ready: Notify,
    space: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl Mailbox {
    pub fn new(agent_id: impl Into<String>, capacity: usize) -> Self {
        Mailbox {
            agent_id: agent_id.into(),
            rings: Mutex::new(Default::default()),
            ready: Notify::new(),
            space: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// The owning agent's id.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Enqueue a message, waiting cooperatively while the mailbox is full.
    ///
    /// Returns `BusError::Closed` once the mailbox has been closed, so a
    /// blocked sender never hangs across shutdown.
    pub async fn push(&self, msg: AgentMessage) -> Result<(), BusError> {
        loop {
            let notified = self.space.notified();
            {
                let mut rings = self.rings.lock().unwrap();
                if self.closed.load(Ordering::Acquire) {
                    return Err(BusError::Closed);
                }
                let total: usize = rings.iter().map(|r| r.len()).sum();
                if total < self.capacity {
                    let idx = slot(msg.priority);
                    rings[idx].push_back(msg);
                    drop(rings);
                    self.ready.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Receive the next message, highest priority first.
    ///
    /// Returns `None` once the mailbox is closed **and** empty — queued
    /// messages are still handed out after close so shutdown signals are
    /// never lost.
    pub async fn recv(&self) -> Option<AgentMessage> {
        loop {
            let notified = self.ready.notified();
            {
                let mut rings = self.rings.lock().unwrap();
                for ring in rings.iter_mut() {
                    if let Some(msg) = ring.pop_front() {
                        drop(rings);
                        self.space.notify_one();
                        return Some(msg);
                    }
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking receive. Used by agents draining their inbox on shutdown.
    pub fn try_recv(&self) -> Option<AgentMessage> {
        let mut rings = self.rings.lock().unwrap();
        for ring in rings.iter_mut() {
            if let Some(msg) = ring.pop_front() {
                drop(rings);
                self.space.notify_one();
                return Some(msg);
            }
        }
        None
    }

    /// Close the mailbox, waking blocked senders and the receiver.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.space.notify_waiters();
        // Stored permits cover waiters that lost the registration race.
        self.ready.notify_one();
        self.space.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.rings.lock().unwrap().iter().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::types::MessageKind;
    use std::sync::Arc;
    use std::time::Duration;

    fn msg(payload: &str, priority: MessagePriority) -> AgentMessage {
        AgentMessage::new(MessageKind::Status, "a", "x", payload).with_priority(priority)
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let mb = Mailbox::new("x", 16);
        mb.push(msg("one", MessagePriority::Normal)).await.unwrap();
        mb.push(msg("two", MessagePriority::Normal)).await.unwrap();
        mb.push(msg("three", MessagePriority::Normal)).await.unwrap();

        assert_eq!(mb.recv().await.unwrap().payload, "one");
        assert_eq!(mb.recv().await.unwrap().payload, "two");
        assert_eq!(mb.recv().await.unwrap().payload, "three");
    }

    #[tokio::test]
    async fn test_priority_overtake() {
        // (normal a, urgent b, normal c) is consumed as b, a, c
        let mb = Mailbox::new("x", 16);
        mb.push(msg("a", MessagePriority::Normal)).await.unwrap();
        mb.push(msg("b", MessagePriority::Urgent)).await.unwrap();
        mb.push(msg("c", MessagePriority::Normal)).await.unwrap();

        assert_eq!(mb.recv().await.unwrap().payload, "b");
        assert_eq!(mb.recv().await.unwrap().payload, "a");
        assert_eq!(mb.recv().await.unwrap().payload, "c");
    }

    #[tokio::test]
    async fn test_high_between_normal_and_urgent() {
        let mb = Mailbox::new("x", 16);
        mb.push(msg("n", MessagePriority::Normal)).await.unwrap();
        mb.push(msg("h", MessagePriority::High)).await.unwrap();
        mb.push(msg("u", MessagePriority::Urgent)).await.unwrap();
        mb.push(msg("l", MessagePriority::Low)).await.unwrap();

        assert_eq!(mb.recv().await.unwrap().payload, "u");
        assert_eq!(mb.recv().await.unwrap().payload, "h");
        assert_eq!(mb.recv().await.unwrap().payload, "n");
        assert_eq!(mb.recv().await.unwrap().payload, "l");
    }

    #[tokio::test]
    async fn test_recv_blocks_until_push() {
        let mb = Arc::new(Mailbox::new("x", 16));
        let mb2 = mb.clone();

        let handle = tokio::spawn(async move { mb2.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        mb.push(msg("late", MessagePriority::Normal)).await.unwrap();

        let received = handle.await.unwrap().unwrap();
        assert_eq!(received.payload, "late");
    }

    #[tokio::test]
    async fn test_push_blocks_when_full_then_resumes() {
        let mb = Arc::new(Mailbox::new("x", 2));
        mb.push(msg("1", MessagePriority::Normal)).await.unwrap();
        mb.push(msg("2", MessagePriority::Normal)).await.unwrap();

        let mb2 = mb.clone();
        let handle = tokio::spawn(async move { mb2.push(msg("3", MessagePriority::Normal)).await });

        // The third push must be parked, not completed
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        // Freeing one slot lets it through
        mb.recv().await.unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(mb.len(), 2);
    }

    #[tokio::test]
    async fn test_close_unblocks_full_sender() {
        let mb = Arc::new(Mailbox::new("x", 1));
        mb.push(msg("1", MessagePriority::Normal)).await.unwrap();

        let mb2 = mb.clone();
        let handle = tokio::spawn(async move { mb2.push(msg("2", MessagePriority::Normal)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        mb.close();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn test_close_drains_queued_then_none() {
        let mb = Mailbox::new("x", 16);
        mb.push(msg("queued", MessagePriority::Normal)).await.unwrap();
        mb.close();

        // Queued message still delivered after close
        assert_eq!(mb.recv().await.unwrap().payload, "queued");
        assert!(mb.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_push_after_close_fails() {
        let mb = Mailbox::new("x", 16);
        mb.close();
        let result = mb.push(msg("x", MessagePriority::Normal)).await;
        assert!(matches!(result, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn test_try_recv() {
        let mb = Mailbox::new("x", 16);
        assert!(mb.try_recv().is_none());
        mb.push(msg("one", MessagePriority::Normal)).await.unwrap();
        assert_eq!(mb.try_recv().unwrap().payload, "one");
        assert!(mb.try_recv().is_none());
    }
}
