//! Checkpoint store — opaque run state under `.checkpoint/`.
//!
//! One JSON file records what the run was asked to build and how far it got.
//! Resume re-reads this state and the workspace; messages are never
//! replayed.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const STATE_FILE: &str = "state.json";

/// Persisted run metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointState {
    pub name: String,
    pub goal: String,
    pub domain: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    #[serde(default)]
    pub phases_completed: Vec<String>,
}

/// Reads and writes the checkpoint file.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CheckpointManager { dir: dir.into() }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Record the start of a fresh generation, overwriting any prior state.
    pub fn start_generation(
        &self,
        name: &str,
        goal: &str,
        domain: &str,
    ) -> std::io::Result<CheckpointState> {
        let state = CheckpointState {
            name: name.to_string(),
            goal: goal.to_string(),
            domain: domain.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            success: None,
            phases_completed: Vec::new(),
        };
        self.save(&state)?;
        Ok(state)
    }

    /// Load existing state, if a readable checkpoint exists.
    pub fn load(&self) -> Option<CheckpointState> {
        let path = self.state_path();
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => {
                debug!(path = %path.display(), "loaded checkpoint");
                Some(state)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable checkpoint ignored");
                None
            }
        }
    }

    /// Mark the run finished and persist the outcome.
    pub fn complete_generation(&self, success: bool, phases: &[String]) -> std::io::Result<()> {
        let mut state = match self.load() {
            Some(state) => state,
            None => return Ok(()), // nothing started, nothing to complete
        };
        state.completed_at = Some(Utc::now());
        state.success = Some(success);
        state.phases_completed = phases.to_vec();
        self.save(&state)
    }

    fn save(&self, state: &CheckpointState) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(self.state_path(), json)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join(".checkpoint"));

        mgr.start_generation("shop", "an online store", "web_app").unwrap();
        let state = mgr.load().unwrap();
        assert_eq!(state.name, "shop");
        assert_eq!(state.goal, "an online store");
        assert!(state.success.is_none());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join(".checkpoint"));
        assert!(mgr.load().is_none());
    }

    #[test]
    fn test_complete_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join(".checkpoint"));

        mgr.start_generation("shop", "goal", "web_app").unwrap();
        let phases: Vec<String> = ["requirements", "design"].iter().map(|s| s.to_string()).collect();
        mgr.complete_generation(true, &phases).unwrap();

        let state = mgr.load().unwrap();
        assert_eq!(state.success, Some(true));
        assert_eq!(state.phases_completed, phases);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn test_complete_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join(".checkpoint"));
        mgr.complete_generation(false, &[]).unwrap();
        assert!(mgr.load().is_none());
    }

    #[test]
    fn test_corrupt_state_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cp_dir = dir.path().join(".checkpoint");
        std::fs::create_dir_all(&cp_dir).unwrap();
        std::fs::write(cp_dir.join(STATE_FILE), "not json").unwrap();

        let mgr = CheckpointManager::new(&cp_dir);
        assert!(mgr.load().is_none());
    }
}
