//! Per-agent memory: a note store plus the operation log the runtime fills
//! with every tool call.
//!
//! Memory is in-process and dies with the run; anything worth keeping goes
//! into the workspace through the file tools.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// One tool invocation as seen by the memory/history tools.
#[derive(Clone, Debug)]
pub struct OperationRecord {
    pub tool: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Notes and operation history for one agent.
pub struct AgentMemory {
    notes: Mutex<HashMap<String, String>>,
    operations: Mutex<Vec<OperationRecord>>,
}

impl AgentMemory {
    pub fn new() -> Self {
        AgentMemory {
            notes: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
        }
    }

    // ────────────── Notes ──────────────

    /// Store a note under a key, overwriting any previous value.
    pub fn remember(&self, key: &str, value: &str) {
        self.notes
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn recall(&self, key: &str) -> Option<String> {
        self.notes.lock().unwrap().get(key).cloned()
    }

    /// All notes, sorted by key.
    pub fn all_notes(&self) -> Vec<(String, String)> {
        let mut notes: Vec<(String, String)> = self
            .notes
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        notes.sort();
        notes
    }

    // ────────────── Operation log ──────────────

    /// Record one tool call. Called by the runtime on every dispatch.
    pub fn record_operation(&self, tool: &str, summary: &str) {
        self.operations.lock().unwrap().push(OperationRecord {
            tool: tool.to_string(),
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// The most recent `n` operations, oldest first.
    pub fn recent_operations(&self, n: usize) -> Vec<OperationRecord> {
        let ops = self.operations.lock().unwrap();
        let skip = ops.len().saturating_sub(n);
        ops[skip..].to_vec()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.lock().unwrap().len()
    }
}

impl Default for AgentMemory {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_and_recall() {
        let memory = AgentMemory::new();
        memory.remember("api_wrapper", "list responses use an 'items' key");
        assert_eq!(
            memory.recall("api_wrapper").as_deref(),
            Some("list responses use an 'items' key")
        );
        assert!(memory.recall("missing").is_none());
    }

    #[test]
    fn test_remember_overwrites() {
        let memory = AgentMemory::new();
        memory.remember("k", "v1");
        memory.remember("k", "v2");
        assert_eq!(memory.recall("k").as_deref(), Some("v2"));
    }

    #[test]
    fn test_all_notes_sorted() {
        let memory = AgentMemory::new();
        memory.remember("zeta", "1");
        memory.remember("alpha", "2");
        let notes = memory.all_notes();
        assert_eq!(notes[0].0, "alpha");
        assert_eq!(notes[1].0, "zeta");
    }

    #[test]
    fn test_operation_log_recent() {
        let memory = AgentMemory::new();
        for i in 0..10 {
            memory.record_operation("write_file", &format!("file {i}"));
        }
        let recent = memory.recent_operations(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].summary, "file 7");
        assert_eq!(recent[2].summary, "file 9");
        assert_eq!(memory.operation_count(), 10);
    }

    #[test]
    fn test_recent_more_than_available() {
        let memory = AgentMemory::new();
        memory.record_operation("exec", "npm install");
        assert_eq!(memory.recent_operations(100).len(), 1);
    }
}
