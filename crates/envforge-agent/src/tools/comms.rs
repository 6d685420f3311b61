//! Communication tools — how the LLM decides to talk to other agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use envforge_core::config::ToolCategory;

use crate::comms::Comms;

use super::base::{optional_string, optional_u64, require_string, Tool, ToolResult};

/// Default ask timeout in seconds.
const DEFAULT_ASK_TIMEOUT_SECS: u64 = 60;

// ─────────────────────────────────────────────
// AskAgentTool
// ─────────────────────────────────────────────

/// Ask another agent a question and wait for the answer.
pub struct AskAgentTool {
    comms: Arc<Comms>,
}

impl AskAgentTool {
    pub fn new(comms: Arc<Comms>) -> Self {
        Self { comms }
    }
}

#[async_trait]
impl Tool for AskAgentTool {
    fn name(&self) -> &str {
        "ask_agent"
    }

    fn description(&self) -> &str {
        "Ask another agent a question and wait for their response. Use when \
         you need information from another agent's domain: design for specs, \
         database for table structures, backend for endpoints, frontend for \
         components, user for requirements."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Communication
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Target agent id (user, design, database, backend, frontend, task)"
                },
                "question": {
                    "type": "string",
                    "description": "Your question for the agent"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Seconds to wait for the answer (default 60)"
                }
            },
            "required": ["agent_id", "question"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let agent_id = match require_string(&params, "agent_id") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let question = match require_string(&params, "question") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let timeout =
            Duration::from_secs(optional_u64(&params, "timeout").unwrap_or(DEFAULT_ASK_TIMEOUT_SECS));

        match self.comms.ask(&agent_id, &question, timeout).await {
            Ok(answer) => ToolResult::text(format!("Response from {agent_id}: {answer}")),
            Err(e) => ToolResult::err(format!("Could not get an answer from {agent_id}: {e}")),
        }
    }
}

// ─────────────────────────────────────────────
// TellAgentTool
// ─────────────────────────────────────────────

/// Send a one-way notification to another agent.
pub struct TellAgentTool {
    comms: Arc<Comms>,
}

impl TellAgentTool {
    pub fn new(comms: Arc<Comms>) -> Self {
        Self { comms }
    }
}

#[async_trait]
impl Tool for TellAgentTool {
    fn name(&self) -> &str {
        "tell_agent"
    }

    fn description(&self) -> &str {
        "Send a one-way notification to another agent: progress updates, \
         completed work, information they need, or warnings. No response is \
         expected."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Communication
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Target agent id"
                },
                "message": {
                    "type": "string",
                    "description": "The message to send"
                },
                "msg_type": {
                    "type": "string",
                    "description": "update, complete, warning, or info (default update)"
                }
            },
            "required": ["agent_id", "message"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let agent_id = match require_string(&params, "agent_id") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let message = match require_string(&params, "message") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let subtype = optional_string(&params, "msg_type").unwrap_or_else(|| "update".to_string());

        match self.comms.tell(&agent_id, &message, &subtype).await {
            Ok(()) => ToolResult::text(format!("Message sent to {agent_id}")),
            Err(e) => ToolResult::err(format!("Could not message {agent_id}: {e}")),
        }
    }
}

// ─────────────────────────────────────────────
// BroadcastTool
// ─────────────────────────────────────────────

/// Notify every other agent at once.
pub struct BroadcastTool {
    comms: Arc<Comms>,
}

impl BroadcastTool {
    pub fn new(comms: Arc<Comms>) -> Self {
        Self { comms }
    }
}

#[async_trait]
impl Tool for BroadcastTool {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn description(&self) -> &str {
        "Broadcast a message to all other agents. Use for milestone \
         completions and changes everyone must know about."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Communication
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to broadcast"
                },
                "msg_type": {
                    "type": "string",
                    "description": "update, complete, warning, or info (default update)"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let message = match require_string(&params, "message") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let subtype = optional_string(&params, "msg_type").unwrap_or_else(|| "update".to_string());

        let delivered = self.comms.broadcast(&message, &subtype, &[]).await;
        ToolResult::text(format!("Broadcast sent to {delivered} agents"))
    }
}

// ─────────────────────────────────────────────
// ListAgentsTool
// ─────────────────────────────────────────────

/// List the peers this agent can talk to.
pub struct ListAgentsTool {
    comms: Arc<Comms>,
}

impl ListAgentsTool {
    pub fn new(comms: Arc<Comms>) -> Self {
        Self { comms }
    }
}

#[async_trait]
impl Tool for ListAgentsTool {
    fn name(&self) -> &str {
        "list_agents"
    }

    fn description(&self) -> &str {
        "List the other agents you can communicate with and their roles."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Communication
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _params: HashMap<String, Value>) -> ToolResult {
        let peers = self.comms.peers();
        if peers.is_empty() {
            return ToolResult::text("No other agents available");
        }
        let lines: Vec<String> = peers
            .iter()
            .map(|p| format!("- {}: {}", p.id, p.role))
            .collect();
        ToolResult::text(format!("Available agents:\n{}", lines.join("\n")))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
