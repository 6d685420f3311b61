//! Async message bus — the delivery substrate between agents.
//!
//! Point-to-point `send` (fire-and-forget at the sender, exactly one
//! consumer takes each message) plus publish/subscribe topics. The bus never
//! interprets payloads and a failed delivery never crashes it: errors are
//! reported to the caller and logged.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::mailbox::{Mailbox, DEFAULT_MAILBOX_CAPACITY};
use super::types::{AgentMessage, BROADCAST_TARGET};

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

/// Bus-level delivery failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("unknown target agent '{0}'")]
    UnknownTarget(String),
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),
    #[error("message bus is stopped")]
    Closed,
}

// ─────────────────────────────────────────────
// MessageBus
// ─────────────────────────────────────────────

struct BusState {
    mailboxes: HashMap<String, Arc<Mailbox>>,
    /// topic → subscribed agent ids
    topics: HashMap<String, HashSet<String>>,
}

/// The in-process message bus. One instance per run, shared via `Arc`.
pub struct MessageBus {
    state: Mutex<BusState>,
    running: AtomicBool,
    mailbox_capacity: usize,
}

impl MessageBus {
    pub fn new(mailbox_capacity: usize) -> Self {
        MessageBus {
            state: Mutex::new(BusState {
                mailboxes: HashMap::new(),
                topics: HashMap::new(),
            }),
            running: AtomicBool::new(false),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    /// Start accepting traffic. Idempotent.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!("message bus started");
        }
    }

    /// Stop the bus and close every mailbox. Idempotent.
    ///
    /// Blocked senders are woken with `BusError::Closed`; receivers drain
    /// whatever is already queued and then observe end-of-stream.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let state = self.state.lock().unwrap();
            for mailbox in state.mailboxes.values() {
                mailbox.close();
            }
            info!(agents = state.mailboxes.len(), "message bus stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Create and register a mailbox for `agent_id`.
    pub fn register_agent(&self, agent_id: &str) -> Result<Arc<Mailbox>, BusError> {
        let mut state = self.state.lock().unwrap();
        if state.mailboxes.contains_key(agent_id) {
            return Err(BusError::DuplicateAgent(agent_id.to_string()));
        }
        let mailbox = Arc::new(Mailbox::new(agent_id, self.mailbox_capacity));
        state.mailboxes.insert(agent_id.to_string(), mailbox.clone());
        debug!(agent = agent_id, "registered agent mailbox");
        Ok(mailbox)
    }

    /// Remove an agent's mailbox and topic subscriptions, closing the inbox.
    pub fn unregister_agent(&self, agent_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(mailbox) = state.mailboxes.remove(agent_id) {
            mailbox.close();
        }
        for subscribers in state.topics.values_mut() {
            subscribers.remove(agent_id);
        }
        debug!(agent = agent_id, "unregistered agent");
    }

    /// Registered agent ids, sorted for determinism.
    pub fn agent_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state.mailboxes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Deliver `msg` to its target's mailbox.
    ///
    /// A target of `"*"` fans out to every registered agent except the
    /// sender; individual enqueue failures during a fan-out are logged and
    /// skipped rather than propagated.
    pub async fn send(&self, msg: AgentMessage) -> Result<(), BusError> {
        if !self.is_running() {
            return Err(BusError::Closed);
        }

        if msg.target == BROADCAST_TARGET {
            let recipients: Vec<Arc<Mailbox>> = {
                let state = self.state.lock().unwrap();
                state
                    .mailboxes
                    .iter()
                    .filter(|(id, _)| **id != msg.source)
                    .map(|(_, mb)| mb.clone())
                    .collect()
            };
            for mailbox in recipients {
                let mut copy = msg.clone();
                copy.target = mailbox.agent_id().to_string();
                if let Err(e) = mailbox.push(copy).await {
                    warn!(target = mailbox.agent_id(), error = %e, "broadcast delivery skipped");
                }
            }
            return Ok(());
        }

        let mailbox = {
            let state = self.state.lock().unwrap();
            state.mailboxes.get(&msg.target).cloned()
        };
        match mailbox {
            Some(mb) => mb.push(msg).await,
            None => {
                warn!(target = %msg.target, source = %msg.source, "send to unknown target");
                Err(BusError::UnknownTarget(msg.target))
            }
        }
    }

    /// Deliver `msg` independently to every current subscriber of `topic`.
    ///
    /// A subscriber whose mailbox has gone away is a silent drop, logged.
    pub async fn publish(&self, topic: &str, msg: AgentMessage) -> Result<(), BusError> {
        if !self.is_running() {
            return Err(BusError::Closed);
        }

        let recipients: Vec<Arc<Mailbox>> = {
            let state = self.state.lock().unwrap();
            let Some(subscribers) = state.topics.get(topic) else {
                debug!(topic, "publish to topic with no subscribers");
                return Ok(());
            };
            subscribers
                .iter()
                .filter_map(|id| {
                    let mb = state.mailboxes.get(id).cloned();
                    if mb.is_none() {
                        warn!(topic, agent = %id, "subscriber no longer registered, dropping");
                    }
                    mb
                })
                .collect()
        };

        for mailbox in recipients {
            let mut copy = msg.clone();
            copy.target = mailbox.agent_id().to_string();
            if let Err(e) = mailbox.push(copy).await {
                warn!(topic, target = mailbox.agent_id(), error = %e, "publish delivery skipped");
            }
        }
        Ok(())
    }

    /// Subscribe `agent_id` to `topic`.
    pub fn subscribe(&self, agent_id: &str, topic: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(agent_id.to_string());
        debug!(agent = agent_id, topic, "subscribed");
    }

    /// Unsubscribe `agent_id` from `topic`.
    pub fn unsubscribe(&self, agent_id: &str, topic: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(subscribers) = state.topics.get_mut(topic) {
            subscribers.remove(agent_id);
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
