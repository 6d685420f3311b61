//! Bus message types — the envelope every agent exchange travels in.
//!
//! A message carries a header (ids, routing, priority), a kind tag, an
//! opaque string payload, and an extensible metadata map. Payload content is
//! never interpreted by the bus.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target value that addresses every registered agent except the sender.
pub const BROADCAST_TARGET: &str = "*";

// ─────────────────────────────────────────────
// Priority and kind tags
// ─────────────────────────────────────────────

/// Delivery priority. Higher priorities overtake lower ones in a mailbox;
/// ordering is FIFO within one priority class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

/// What a message is. The receiver's inbox loop dispatches on this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Status,
    Task,
    Question,
    Answer,
    Notification,
    Shutdown,
}

// ─────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────

/// Extensible per-message metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Finer-grained tag within the kind (e.g. "update", "complete", "warning").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Arbitrary key→value context attached by the sender.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub ack: bool,
}

// ─────────────────────────────────────────────
// AgentMessage
// ─────────────────────────────────────────────

/// A message between agents (or from the orchestrator, for shutdown).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Globally unique per process run.
    pub id: String,
    pub source: String,
    /// Receiving agent id, or [`BROADCAST_TARGET`].
    pub target: String,
    pub priority: MessagePriority,
    pub timestamp: DateTime<Utc>,
    /// On an answer: the `id` of the question it responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Agent id the receiver should reply to (questions only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub kind: MessageKind,
    /// Opaque content — natural language or JSON, the bus never looks inside.
    pub payload: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl AgentMessage {
    /// Create a message with a fresh id, normal priority, and empty metadata.
    pub fn new(
        kind: MessageKind,
        source: impl Into<String>,
        target: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        AgentMessage {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            target: target.into(),
            priority: MessagePriority::Normal,
            timestamp: Utc::now(),
            correlation_id: None,
            reply_to: None,
            kind,
            payload: payload.into(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Builder-style priority override.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style subtype override.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.metadata.subtype = Some(subtype.into());
        self
    }

    /// A question addressed to `target`. Carries `reply_to` and a
    /// correlation id equal to the message's own id, so the answer can be
    /// matched by the asker's pending-request table.
    pub fn question(
        source: impl Into<String>,
        target: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let mut msg = AgentMessage::new(MessageKind::Question, source.clone(), target, payload);
        msg.reply_to = Some(source);
        msg.correlation_id = Some(msg.id.clone());
        msg
    }

    /// The answer to `question`, copying its correlation id and routing to
    /// its `reply_to` (falling back to the question's source).
    pub fn answer_to(
        question: &AgentMessage,
        source: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        let target = question
            .reply_to
            .clone()
            .unwrap_or_else(|| question.source.clone());
        let mut msg = AgentMessage::new(MessageKind::Answer, source, target, payload);
        msg.correlation_id = question
            .correlation_id
            .clone()
            .or_else(|| Some(question.id.clone()));
        msg
    }

    /// A one-shot notification with a subtype tag.
    pub fn notification(
        source: impl Into<String>,
        target: impl Into<String>,
        payload: impl Into<String>,
        subtype: impl Into<String>,
    ) -> Self {
        AgentMessage::new(MessageKind::Notification, source, target, payload)
            .with_subtype(subtype)
    }

    /// An urgent shutdown signal from the orchestrator.
    pub fn shutdown(target: impl Into<String>) -> Self {
        AgentMessage::new(MessageKind::Shutdown, "orchestrator", target, "shutdown")
            .with_priority(MessagePriority::Urgent)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_defaults() {
        let msg = AgentMessage::new(MessageKind::Status, "backend", "user", "routes ready");

        assert_eq!(msg.source, "backend");
        assert_eq!(msg.target, "user");
        assert_eq!(msg.priority, MessagePriority::Normal);
        assert!(msg.correlation_id.is_none());
        assert!(msg.reply_to.is_none());
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_message_ids_unique() {
        let a = AgentMessage::new(MessageKind::Status, "a", "b", "x");
        let b = AgentMessage::new(MessageKind::Status, "a", "b", "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_question_sets_reply_to_and_correlation() {
        let q = AgentMessage::question("frontend", "design", "what is the palette?");

        assert_eq!(q.kind, MessageKind::Question);
        assert_eq!(q.reply_to.as_deref(), Some("frontend"));
        assert_eq!(q.correlation_id.as_deref(), Some(q.id.as_str()));
    }

    #[test]
    fn test_answer_copies_correlation_and_routes_to_reply_to() {
        let q = AgentMessage::question("frontend", "design", "palette?");
        let a = AgentMessage::answer_to(&q, "design", "slate and amber");

        assert_eq!(a.kind, MessageKind::Answer);
        assert_eq!(a.target, "frontend");
        assert_eq!(a.correlation_id, Some(q.id.clone()));
    }

    #[test]
    fn test_shutdown_is_urgent() {
        let msg = AgentMessage::shutdown("backend");
        assert_eq!(msg.kind, MessageKind::Shutdown);
        assert_eq!(msg.priority, MessagePriority::Urgent);
        assert_eq!(msg.source, "orchestrator");
    }

    #[test]
    fn test_notification_subtype() {
        let msg = AgentMessage::notification("database", "backend", "schema ready", "complete");
        assert_eq!(msg.metadata.subtype.as_deref(), Some("complete"));
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut msg = AgentMessage::question("user", "design", "status?");
        msg.metadata
            .context
            .insert("phase".to_string(), "design".to_string());
        msg.metadata.tags.push("urgent-ish".to_string());

        let json = serde_json::to_string(&msg).unwrap();
        let back: AgentMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
