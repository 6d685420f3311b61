//! Progress event emitter — synchronous fan-out of lifecycle events.
//!
//! Listeners are plain closures; a listener that panics is swallowed so
//! emitting can never fail the producer. One emitter per run, shared by the
//! orchestrator and every agent.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

// ─────────────────────────────────────────────
// Event types
// ─────────────────────────────────────────────

/// Closed enumeration of everything the system reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PhaseStart,
    PhaseComplete,
    PhaseError,
    FilePlan,
    FileStart,
    FileComplete,
    FileError,
    ThinkStart,
    ThinkResult,
    ToolCall,
    ToolResult,
    ReflectStart,
    ReflectResult,
    FixStart,
    FixApplied,
    VerificationStart,
    VerificationError,
    VerificationPass,
    MemoryStore,
    MemoryRecall,
    GenerationStart,
    GenerationComplete,
    GenerationError,
}

/// A single progress event.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub message: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ─────────────────────────────────────────────
// Emitter
// ─────────────────────────────────────────────

pub type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// Registers listeners and fans events out to them synchronously.
pub struct EventEmitter {
    by_type: Mutex<HashMap<EventType, Vec<Listener>>>,
    global: Mutex<Vec<Listener>>,
    history: Mutex<Option<Vec<Event>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        EventEmitter {
            by_type: Mutex::new(HashMap::new()),
            global: Mutex::new(Vec::new()),
            history: Mutex::new(None),
        }
    }

    /// Register a listener for one event type.
    pub fn on(&self, event_type: EventType, listener: Listener) {
        self.by_type
            .lock()
            .unwrap()
            .entry(event_type)
            .or_default()
            .push(listener);
    }

    /// Register a listener for every event.
    pub fn on_all(&self, listener: Listener) {
        self.global.lock().unwrap().push(listener);
    }

    /// Emit an event to all matching listeners. Never fails: panicking
    /// listeners are caught and ignored.
    pub fn emit(&self, event_type: EventType, message: impl Into<String>, data: Value) -> Event {
        let event = Event {
            event_type,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        };

        if let Some(history) = self.history.lock().unwrap().as_mut() {
            history.push(event.clone());
        }

        if let Some(listeners) = self.by_type.lock().unwrap().get(&event_type) {
            for listener in listeners {
                let _ = catch_unwind(AssertUnwindSafe(|| listener(&event)));
            }
        }
        for listener in self.global.lock().unwrap().iter() {
            let _ = catch_unwind(AssertUnwindSafe(|| listener(&event)));
        }

        event
    }

    /// Start recording every emitted event.
    pub fn enable_history(&self) {
        let mut history = self.history.lock().unwrap();
        if history.is_none() {
            *history = Some(Vec::new());
        }
    }

    /// Recorded events, if history is enabled.
    pub fn history(&self) -> Vec<Event> {
        self.history.lock().unwrap().clone().unwrap_or_default()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Built-in listeners
// ─────────────────────────────────────────────

/// A listener that prints events to the terminal, one line each.
pub fn console_listener() -> Listener {
    Box::new(|event: &Event| {
        let tag = format!("{:?}", event.event_type);
        let line = match event.event_type {
            EventType::PhaseError | EventType::GenerationError | EventType::FileError => {
                format!("[{tag}] {}", event.message).red().to_string()
            }
            EventType::PhaseComplete | EventType::GenerationComplete | EventType::VerificationPass => {
                format!("[{tag}] {}", event.message).green().to_string()
            }
            EventType::ToolCall | EventType::ToolResult => {
                format!("[{tag}] {}", event.message).dimmed().to_string()
            }
            _ => format!("[{tag}] {}", event.message),
        };
        println!("{line}");
    })
}

/// A listener that appends events as JSON lines to a file.
pub fn file_listener(path: std::path::PathBuf) -> Listener {
    Box::new(move |event: &Event| {
        use std::io::Write;
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "{}", event.to_json());
        }
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_typed_listener_fires() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        emitter.on(
            EventType::PhaseStart,
            Box::new(move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        emitter.emit(EventType::PhaseStart, "design", json!({}));
        emitter.emit(EventType::PhaseComplete, "design", json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_listener_sees_everything() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        emitter.on_all(Box::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));

        emitter.emit(EventType::ToolCall, "exec", json!({}));
        emitter.emit(EventType::ToolResult, "exec", json!({}));
        emitter.emit(EventType::GenerationComplete, "done", json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_listener_swallowed() {
        let emitter = EventEmitter::new();
        let reached = Arc::new(AtomicUsize::new(0));
        let reached2 = reached.clone();

        emitter.on_all(Box::new(|_| panic!("listener bug")));
        emitter.on_all(Box::new(move |_| {
            reached2.fetch_add(1, Ordering::SeqCst);
        }));

        // Must not propagate the panic, and later listeners still run
        emitter.emit(EventType::PhaseStart, "x", json!({}));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_history_recording() {
        let emitter = EventEmitter::new();
        emitter.emit(EventType::PhaseStart, "before", json!({}));
        emitter.enable_history();
        emitter.emit(EventType::PhaseComplete, "after", json!({"phase": "design"}));

        let history = emitter.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "after");
        assert_eq!(history[0].data["phase"], "design");
    }

    #[test]
    fn test_event_to_json() {
        let emitter = EventEmitter::new();
        let event = emitter.emit(EventType::GenerationStart, "go", json!({"name": "shop"}));
        let parsed: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["event_type"], "generation_start");
        assert_eq!(parsed["data"]["name"], "shop");
    }

    #[test]
    fn test_file_listener_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let emitter = EventEmitter::new();
        emitter.on_all(file_listener(path.clone()));

        emitter.emit(EventType::PhaseStart, "one", json!({}));
        emitter.emit(EventType::PhaseComplete, "two", json!({}));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim().lines().count(), 2);
    }
}
