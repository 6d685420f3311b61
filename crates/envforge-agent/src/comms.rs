//! Inter-agent communication handle: ask / tell / broadcast plus the
//! pending-request table that matches answers to questions.
//!
//! Agents hold only peer ids — every exchange goes through the bus, so no
//! agent ever references another agent's internals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use envforge_core::bus::{AgentMessage, BusError, MessageBus};

// ─────────────────────────────────────────────
// Peers
// ─────────────────────────────────────────────

/// What one agent knows about another: id, display name, one-line role.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
    pub role: String,
}

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AskError {
    #[error("agent '{0}' is not a known peer")]
    UnknownAgent(String),
    #[error("timed out waiting for an answer")]
    Timeout,
    #[error("request canceled by shutdown")]
    Canceled,
    #[error(transparent)]
    Bus(#[from] BusError),
}

// ─────────────────────────────────────────────
// Comms
// ─────────────────────────────────────────────

/// Per-agent communication handle, shared with the communication tools.
pub struct Comms {
    agent_id: String,
    bus: Arc<MessageBus>,
    /// correlation_id → completion slot. An entry exists iff a caller is
    /// blocked in `ask` for that question.
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
    peers: Mutex<Vec<PeerInfo>>,
}

impl Comms {
    pub fn new(agent_id: impl Into<String>, bus: Arc<MessageBus>) -> Self {
        Comms {
            agent_id: agent_id.into(),
            bus,
            pending: Mutex::new(HashMap::new()),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        *self.peers.lock().unwrap() = peers;
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().unwrap().clone()
    }

    pub fn knows(&self, agent_id: &str) -> bool {
        self.peers.lock().unwrap().iter().any(|p| p.id == agent_id)
    }

    /// Ask a peer a question and block until the answer arrives or
    /// `timeout` elapses. On timeout the pending slot is removed, so a late
    /// answer is discarded by the inbox loop.
    pub async fn ask(
        &self,
        target: &str,
        question: &str,
        timeout: Duration,
    ) -> Result<String, AskError> {
        if !self.knows(target) {
            return Err(AskError::UnknownAgent(target.to_string()));
        }

        let msg = AgentMessage::question(&self.agent_id, target, question);
        let correlation_id = msg.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(correlation_id.clone(), tx);

        info!(
            from = %self.agent_id,
            to = target,
            question = %truncate(question, 60),
            "ask"
        );

        if let Err(e) = self.bus.send(msg).await {
            self.pending.lock().unwrap().remove(&correlation_id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(AskError::Canceled),
            Err(_) => {
                self.pending.lock().unwrap().remove(&correlation_id);
                Err(AskError::Timeout)
            }
        }
    }

    /// Complete the pending slot for `correlation_id`. Returns false for an
    /// unmatched (late or unsolicited) answer, which the caller drops.
    pub fn complete(&self, correlation_id: &str, answer: String) -> bool {
        let slot = self.pending.lock().unwrap().remove(correlation_id);
        match slot {
            Some(tx) => tx.send(answer).is_ok(),
            None => false,
        }
    }

    /// Number of in-flight asks. Empty except while blocked in `ask`.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Abort all in-flight asks (shutdown path). Waiters observe `Canceled`.
    pub fn cancel_pending(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// One-shot notification to a peer.
    pub async fn tell(&self, target: &str, body: &str, subtype: &str) -> Result<(), AskError> {
        if !self.knows(target) {
            return Err(AskError::UnknownAgent(target.to_string()));
        }
        info!(from = %self.agent_id, to = target, subtype, "tell");
        let msg = AgentMessage::notification(&self.agent_id, target, body, subtype);
        self.bus.send(msg).await?;
        Ok(())
    }

    /// One `tell` per non-excluded peer. Per-peer failures are logged and
    /// skipped; a broadcast never fails as a whole.
    pub async fn broadcast(&self, body: &str, subtype: &str, exclude: &[&str]) -> usize {
        let peers = self.peers();
        let mut delivered = 0;
        for peer in peers {
            if exclude.contains(&peer.id.as_str()) {
                continue;
            }
            match self.tell(&peer.id, body, subtype).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(to = %peer.id, error = %e, "broadcast delivery skipped"),
            }
        }
        debug!(from = %self.agent_id, delivered, "broadcast");
        delivered
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &s[..cut])
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use envforge_core::bus::MessageKind;

    fn peer(id: &str) -> PeerInfo {
        PeerInfo {
            id: id.to_string(),
            name: format!("{id} agent"),
            role: "test".to_string(),
        }
    }

    fn setup() -> (Arc<MessageBus>, Arc<Comms>) {
        let bus = Arc::new(MessageBus::new(64));
        bus.start();
        let comms = Arc::new(Comms::new("a", bus.clone()));
        comms.set_peers(vec![peer("b")]);
        (bus, comms)
    }

    #[tokio::test]
    async fn test_ask_answer_round_trip() {
        let (bus, comms) = setup();
        let a_inbox = bus.register_agent("a").unwrap();
        let b_inbox = bus.register_agent("b").unwrap();

        // B's side: answer the question with the matching correlation id
        let bus2 = bus.clone();
        tokio::spawn(async move {
            let question = b_inbox.recv().await.unwrap();
            assert_eq!(question.kind, MessageKind::Question);
            assert_eq!(question.payload, "what is 2+2?");
            let answer = AgentMessage::answer_to(&question, "b", "four");
            bus2.send(answer).await.unwrap();
        });

        // A's inbox loop, reduced to answer routing
        let comms2 = comms.clone();
        tokio::spawn(async move {
            let msg = a_inbox.recv().await.unwrap();
            assert_eq!(msg.kind, MessageKind::Answer);
            let cid = msg.correlation_id.clone().unwrap();
            assert!(comms2.complete(&cid, msg.payload));
        });

        let answer = comms
            .ask("b", "what is 2+2?", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer, "four");
        assert_eq!(comms.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_ask_unknown_peer() {
        let (_bus, comms) = setup();
        let result = comms.ask("ghost", "?", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(AskError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_ask_timeout_removes_slot_and_drops_late_answer() {
        let (bus, comms) = setup();
        bus.register_agent("a").unwrap();
        let _b_inbox = bus.register_agent("b").unwrap();

        // B never answers
        let result = comms.ask("b", "x", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(AskError::Timeout)));
        assert_eq!(comms.pending_len(), 0);

        // A late answer has no matching slot: unmatched, dropped
        assert!(!comms.complete("stale-correlation-id", "late".to_string()));
    }

    #[tokio::test]
    async fn test_complete_unmatched_is_false() {
        let (_bus, comms) = setup();
        assert!(!comms.complete("nope", "answer".to_string()));
    }

    #[tokio::test]
    async fn test_tell_delivers_notification() {
        let (bus, comms) = setup();
        let b_inbox = bus.register_agent("b").unwrap();

        comms.tell("b", "API ready", "update").await.unwrap();

        let msg = b_inbox.recv().await.unwrap();
        assert_eq!(msg.kind, MessageKind::Notification);
        assert_eq!(msg.payload, "API ready");
        assert_eq!(msg.metadata.subtype.as_deref(), Some("update"));
    }

    #[tokio::test]
    async fn test_broadcast_excludes() {
        let bus = Arc::new(MessageBus::new(64));
        bus.start();
        let comms = Comms::new("a", bus.clone());
        comms.set_peers(vec![peer("b"), peer("c"), peer("d")]);
        let b = bus.register_agent("b").unwrap();
        let c = bus.register_agent("c").unwrap();
        let d = bus.register_agent("d").unwrap();

        let delivered = comms.broadcast("schema updated", "update", &["c"]).await;
        assert_eq!(delivered, 2);
        assert!(b.try_recv().is_some());
        assert!(c.try_recv().is_none());
        assert!(d.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_broadcast_survives_missing_mailbox() {
        let bus = Arc::new(MessageBus::new(64));
        bus.start();
        let comms = Comms::new("a", bus.clone());
        comms.set_peers(vec![peer("b"), peer("gone")]);
        let b = bus.register_agent("b").unwrap();
        // "gone" is a known peer but was never registered on the bus

        let delivered = comms.broadcast("hello", "update", &[]).await;
        assert_eq!(delivered, 1);
        assert!(b.try_recv().is_some());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "héllo wörld, this is a long string";
        let t = truncate(s, 10);
        assert!(t.ends_with('…'));
    }
}
