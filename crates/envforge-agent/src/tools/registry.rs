//! Tool registry — name-keyed store and dispatcher.
//!
//! The runtime registers only tools whose category the agent is allowed to
//! use, so a dispatch for anything else resolves to "not found". The LLM
//! always gets a result back, failure or not.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use envforge_core::config::ToolCategory;
use envforge_core::types::ToolDefinition;

use super::base::{Tool, ToolResult};

/// Stores tools keyed by name and dispatches calls.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Register only if the tool's category is whitelisted.
    pub fn register_if_allowed(&mut self, tool: Arc<dyn Tool>, allowed: &[ToolCategory]) {
        if allowed.contains(&tool.category()) {
            self.register(tool);
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// LLM-facing definitions for all registered tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name. An unknown name is a structured failure,
    /// never a panic.
    pub async fn execute(&self, name: &str, params: HashMap<String, Value>) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute(params).await,
            None => {
                warn!(tool = name, "tool not found");
                ToolResult::err(format!("Tool '{name}' not found"))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
