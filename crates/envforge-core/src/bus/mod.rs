//! In-process message bus: point-to-point delivery, pub/sub topics, and
//! per-agent priority mailboxes.

pub mod mailbox;
pub mod queue;
pub mod types;

pub use mailbox::Mailbox;
pub use queue::{BusError, MessageBus};
pub use types::{AgentMessage, MessageKind, MessageMetadata, MessagePriority, BROADCAST_TARGET};
