//! Memory tools — notes and operation history over [`AgentMemory`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use envforge_core::config::ToolCategory;

use crate::memory::AgentMemory;

use super::base::{optional_string, optional_u64, require_string, Tool, ToolResult};

// ─────────────────────────────────────────────
// RememberTool
// ─────────────────────────────────────────────

/// Store a fact under a key for later recall.
pub struct RememberTool {
    memory: Arc<AgentMemory>,
}

impl RememberTool {
    pub fn new(memory: Arc<AgentMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store a fact under a key so you can recall it later in this run \
         (decisions, formats, agreed contracts)."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Short identifier for the fact"
                },
                "value": {
                    "type": "string",
                    "description": "The fact to store"
                }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let key = match require_string(&params, "key") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let value = match require_string(&params, "value") {
            Ok(v) => v,
            Err(e) => return e,
        };
        self.memory.remember(&key, &value);
        ToolResult::text(format!("Remembered '{key}'"))
    }
}

// ─────────────────────────────────────────────
// RecallTool
// ─────────────────────────────────────────────

/// Recall one note or list them all.
pub struct RecallTool {
    memory: Arc<AgentMemory>,
}

impl RecallTool {
    pub fn new(memory: Arc<AgentMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Recall a stored fact by key, or omit the key to list everything you \
         have remembered."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Key to recall (optional)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        match optional_string(&params, "key") {
            Some(key) => match self.memory.recall(&key) {
                Some(value) => ToolResult::text(value),
                None => ToolResult::err(format!("Nothing remembered under '{key}'")),
            },
            None => {
                let notes = self.memory.all_notes();
                if notes.is_empty() {
                    ToolResult::text("(no notes)")
                } else {
                    let lines: Vec<String> =
                        notes.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                    ToolResult::text(lines.join("\n"))
                }
            }
        }
    }
}

// ─────────────────────────────────────────────
// OperationHistoryTool
// ─────────────────────────────────────────────

/// Review the agent's own recent tool calls.
pub struct OperationHistoryTool {
    memory: Arc<AgentMemory>,
}

impl OperationHistoryTool {
    pub fn new(memory: Arc<AgentMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for OperationHistoryTool {
    fn name(&self) -> &str {
        "operation_history"
    }

    fn description(&self) -> &str {
        "Show your most recent tool calls, oldest first. Useful to avoid \
         repeating work."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "last": {
                    "type": "integer",
                    "description": "How many operations to show (default 20)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let last = optional_u64(&params, "last").unwrap_or(20) as usize;
        let operations = self.memory.recent_operations(last);
        if operations.is_empty() {
            return ToolResult::text("(no operations yet)");
        }
        let lines: Vec<String> = operations
            .iter()
            .map(|op| format!("[{}] {}: {}", op.timestamp.format("%H:%M:%S"), op.tool, op.summary))
            .collect();
        ToolResult::text(lines.join("\n"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
