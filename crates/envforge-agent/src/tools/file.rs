//! File tools — workspace access for the LLM.
//!
//! Every path goes through the WorkspaceManager, so role isolation and path
//! safety apply to the model exactly as they do to the code. A denied write
//! comes back as error text the model can react to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use envforge_core::config::ToolCategory;
use envforge_core::workspace::WorkspaceManager;

use super::base::{optional_string, require_string, Tool, ToolResult};

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

/// Read a workspace file.
pub struct ReadFileTool {
    workspace: Arc<WorkspaceManager>,
    agent_id: String,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<WorkspaceManager>, agent_id: impl Into<String>) -> Self {
        Self {
            workspace,
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Any file is readable, regardless of \
         which agent wrote it."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let path = match require_string(&params, "path") {
            Ok(v) => v,
            Err(e) => return e,
        };
        match self.workspace.read(&path, &self.agent_id) {
            Ok(content) => ToolResult::text(content),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

/// Create or overwrite a file inside the agent's write-root.
pub struct WriteFileTool {
    workspace: Arc<WorkspaceManager>,
    agent_id: String,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<WorkspaceManager>, agent_id: impl Into<String>) -> Self {
        Self {
            workspace,
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in your write directory, creating it (and \
         parent directories) if needed. Writes outside your write directory \
         are denied."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let path = match require_string(&params, "path") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let content = match require_string(&params, "content") {
            Ok(v) => v,
            Err(e) => return e,
        };
        match self.workspace.write(&path, &content, &self.agent_id) {
            Ok(()) => ToolResult::text(format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

/// Replace one unique text snippet in a file.
pub struct EditFileTool {
    workspace: Arc<WorkspaceManager>,
    agent_id: String,
}

impl EditFileTool {
    pub fn new(workspace: Arc<WorkspaceManager>, agent_id: impl Into<String>) -> Self {
        Self {
            workspace,
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing `old_text` with `new_text`. `old_text` must \
         occur exactly once; include surrounding context to make it unique."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find (must be unique in the file)"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let path = match require_string(&params, "path") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let old_text = match require_string(&params, "old_text") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let new_text = match require_string(&params, "new_text") {
            Ok(v) => v,
            Err(e) => return e,
        };

        let content = match self.workspace.read(&path, &self.agent_id) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let count = content.matches(&old_text).count();
        if count == 0 {
            return ToolResult::err(format!("old_text not found in {path}"));
        }
        if count > 1 {
            return ToolResult::err(format!(
                "old_text occurs {count} times in {path}; it must be unique"
            ));
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        match self.workspace.write(&path, &updated, &self.agent_id) {
            Ok(()) => ToolResult::text(format!("Edited {path}")),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────
// ListFilesTool
// ─────────────────────────────────────────────

/// List workspace files recursively.
pub struct ListFilesTool {
    workspace: Arc<WorkspaceManager>,
    agent_id: String,
}

impl ListFilesTool {
    pub fn new(workspace: Arc<WorkspaceManager>, agent_id: impl Into<String>) -> Self {
        Self {
            workspace,
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files under a workspace directory, recursively. Omit `dir` to \
         list the whole workspace."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dir": {
                    "type": "string",
                    "description": "Workspace-relative directory (optional)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let dir = optional_string(&params, "dir").unwrap_or_default();
        match self.workspace.list(&dir, &self.agent_id) {
            Ok(files) if files.is_empty() => ToolResult::text("(no files)"),
            Ok(files) => ToolResult::text(files.join("\n")),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_params(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn workspace() -> (Arc<WorkspaceManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(WorkspaceManager::for_generation(dir.path()).unwrap());
        (ws, dir)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (ws, _dir) = workspace();
        let write = WriteFileTool::new(ws.clone(), "design");
        let read = ReadFileTool::new(ws, "backend");

        let result = write
            .execute(make_params(&[
                ("path", "design/spec.api.json"),
                ("content", "{\"routes\": []}"),
            ]))
            .await;
        assert!(result.success);

        let result = read
            .execute(make_params(&[("path", "design/spec.api.json")]))
            .await;
        assert_eq!(result.render(), "{\"routes\": []}");
    }

    #[tokio::test]
    async fn test_write_denied_outside_root() {
        let (ws, dir) = workspace();
        let write = WriteFileTool::new(ws, "design");

        let result = write
            .execute(make_params(&[
                ("path", "app/backend/server.js"),
                ("content", "..."),
            ]))
            .await;
        assert!(!result.success);
        assert!(result.render().contains("may not write"));
        assert!(!dir.path().join("app/backend/server.js").exists());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (ws, _dir) = workspace();
        let read = ReadFileTool::new(ws, "user");
        let result = read.execute(make_params(&[("path", "design/none.json")])).await;
        assert!(!result.success);
        assert!(result.render().contains("not found"));
    }

    #[tokio::test]
    async fn test_edit_file_unique_replacement() {
        let (ws, _dir) = workspace();
        ws.write("design/spec.md", "port: OLD\nname: shop", "design").unwrap();

        let edit = EditFileTool::new(ws.clone(), "design");
        let result = edit
            .execute(make_params(&[
                ("path", "design/spec.md"),
                ("old_text", "port: OLD"),
                ("new_text", "port: 3000"),
            ]))
            .await;
        assert!(result.success);
        assert_eq!(ws.read("design/spec.md", "user").unwrap(), "port: 3000\nname: shop");
    }

    #[tokio::test]
    async fn test_edit_file_rejects_ambiguous() {
        let (ws, _dir) = workspace();
        ws.write("design/spec.md", "x x", "design").unwrap();

        let edit = EditFileTool::new(ws, "design");
        let result = edit
            .execute(make_params(&[
                ("path", "design/spec.md"),
                ("old_text", "x"),
                ("new_text", "y"),
            ]))
            .await;
        assert!(!result.success);
        assert!(result.render().contains("must be unique"));
    }

    #[tokio::test]
    async fn test_edit_file_missing_old_text() {
        let (ws, _dir) = workspace();
        ws.write("design/spec.md", "abc", "design").unwrap();

        let edit = EditFileTool::new(ws, "design");
        let result = edit
            .execute(make_params(&[
                ("path", "design/spec.md"),
                ("old_text", "zzz"),
                ("new_text", "y"),
            ]))
            .await;
        assert!(!result.success);
        assert!(result.render().contains("not found"));
    }

    #[tokio::test]
    async fn test_list_files() {
        let (ws, _dir) = workspace();
        ws.write("design/a.json", "{}", "design").unwrap();
        ws.write("design/b.json", "{}", "design").unwrap();

        let list = ListFilesTool::new(ws, "user");
        let mut params = HashMap::new();
        params.insert("dir".to_string(), json!("design"));
        let result = list.execute(params).await;

        let rendered = result.render();
        assert!(rendered.contains("design/a.json"));
        assert!(rendered.contains("design/b.json"));
    }

    #[tokio::test]
    async fn test_list_files_empty() {
        let (ws, _dir) = workspace();
        let list = ListFilesTool::new(ws, "user");
        let mut params = HashMap::new();
        params.insert("dir".to_string(), json!("design"));
        let result = list.execute(params).await;
        assert_eq!(result.render(), "(no files)");
    }

    #[test]
    fn test_tool_metadata() {
        let (ws, _dir) = workspace();
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(ReadFileTool::new(ws.clone(), "a")),
            Box::new(WriteFileTool::new(ws.clone(), "a")),
            Box::new(EditFileTool::new(ws.clone(), "a")),
            Box::new(ListFilesTool::new(ws, "a")),
        ];
        for tool in &tools {
            assert_eq!(tool.category(), ToolCategory::File);
            assert_eq!(tool.to_definition().tool_type, "function");
        }
    }
}
