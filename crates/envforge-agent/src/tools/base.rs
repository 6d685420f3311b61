//! Tool trait — the contract every agent tool satisfies.
//!
//! A tool has a stable name, a category tag used for per-role whitelisting,
//! a JSON-schema parameter description, and an `execute` returning a
//! structured [`ToolResult`]. Failures flow back into the LLM conversation
//! as text; they are never raised past the registry.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use envforge_core::config::ToolCategory;
use envforge_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// ToolResult
// ─────────────────────────────────────────────

/// Structured outcome of one tool call.
#[derive(Clone, Debug)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        ToolResult {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Success with a plain text payload (the common case).
    pub fn text(message: impl Into<String>) -> Self {
        Self::ok(Value::String(message.into()))
    }

    pub fn err(message: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Render for the LLM conversation. Failures become `Error: …` text.
    pub fn render(&self) -> String {
        if self.success {
            match &self.data {
                Some(Value::String(s)) => s.clone(),
                Some(other) => serde_json::to_string_pretty(other)
                    .unwrap_or_else(|_| "ok".to_string()),
                None => "ok".to_string(),
            }
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown failure"))
        }
    }
}

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
///
/// The registry dispatches LLM tool-call requests by `name()`; the runtime
/// whitelists tools by `category()` before they are ever registered.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the LLM calls this tool by (e.g. `"write_file"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;

    /// Capability class used for per-agent whitelisting.
    fn category(&self) -> ToolCategory;

    /// JSON Schema describing the parameters:
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute with the parsed arguments.
    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult;

    /// The LLM-facing definition. Rarely overridden.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required string param, with a user-friendly error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> Result<String, ToolResult> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ToolResult::err(format!("Missing required parameter: {key}")))
}

pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub fn optional_u64(params: &HashMap<String, Value>, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Extract an optional array of strings.
pub fn optional_string_vec(params: &HashMap<String, Value>, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_string_present() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!("design/spec.json"));
        assert_eq!(require_string(&params, "path").unwrap(), "design/spec.json");
    }

    #[test]
    fn test_require_string_missing() {
        let params = HashMap::new();
        let err = require_string(&params, "path").unwrap_err();
        assert!(err.render().contains("Missing required parameter: path"));
    }

    #[test]
    fn test_require_string_wrong_type() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!(42));
        assert!(require_string(&params, "path").is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let mut params = HashMap::new();
        params.insert("force".into(), json!(true));
        params.insert("lines".into(), json!(50));
        params.insert("steps".into(), json!(["a", "b"]));

        assert!(optional_bool(&params, "force"));
        assert!(!optional_bool(&params, "missing"));
        assert_eq!(optional_u64(&params, "lines"), Some(50));
        assert_eq!(optional_string_vec(&params, "steps"), vec!["a", "b"]);
        assert!(optional_string_vec(&params, "missing").is_empty());
    }

    #[test]
    fn test_render_text() {
        assert_eq!(ToolResult::text("done").render(), "done");
    }

    #[test]
    fn test_render_error() {
        assert_eq!(ToolResult::err("nope").render(), "Error: nope");
    }

    #[test]
    fn test_render_structured() {
        let result = ToolResult::ok(json!({"port": 8080}));
        assert!(result.render().contains("8080"));
    }

    #[tokio::test]
    async fn test_to_definition_default() {
        struct DummyTool;

        #[async_trait]
        impl Tool for DummyTool {
            fn name(&self) -> &str {
                "dummy"
            }
            fn description(&self) -> &str {
                "A test tool"
            }
            fn category(&self) -> ToolCategory {
                ToolCategory::Reasoning
            }
            fn parameters(&self) -> Value {
                json!({"type": "object", "properties": {}, "required": []})
            }
            async fn execute(&self, _params: HashMap<String, Value>) -> ToolResult {
                ToolResult::text("ok")
            }
        }

        let def = DummyTool.to_definition();
        assert_eq!(def.function.name, "dummy");
        assert_eq!(def.tool_type, "function");
    }
}
