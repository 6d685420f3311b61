//! Workspace manager — role-scoped file access in one directory tree.
//!
//! Every agent may read anywhere under the workspace root; each agent may
//! write only under its own write-root. Paths are normalized (lexical `..`
//! collapse, then symlink-aware canonicalization of the deepest existing
//! ancestor) before any permission check, so no input can escape the root.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, error, warn};

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The input path resolves outside the workspace root. Hard error.
    #[error("path '{0}' escapes the workspace root")]
    Escape(String),
    /// The agent has no write permission for the path. Non-fatal, logged.
    #[error("agent '{agent}' may not write to '{path}'")]
    Denied { agent: String, path: String },
    #[error("file not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WorkspaceError {
    pub fn is_denied(&self) -> bool {
        matches!(self, WorkspaceError::Denied { .. })
    }
}

// ─────────────────────────────────────────────
// WorkspaceManager
// ─────────────────────────────────────────────

/// Directories created for every generation workspace.
const STANDARD_DIRS: &[&str] = &[
    "design",
    "app/database",
    "app/backend/routes",
    "app/backend/middleware",
    "app/frontend/src/pages",
    "app/frontend/src/components",
    "app/frontend/src/services",
    "docker",
    "tasks",
    "screenshots",
    ".checkpoint",
];

/// Role-scoped file access for the multi-agent workspace.
pub struct WorkspaceManager {
    /// Canonical absolute workspace root. Never handed out.
    base_dir: PathBuf,
    /// agent_id → relative write-root. Absent means no write rights.
    write_roots: HashMap<String, PathBuf>,
    /// Serializes writers; readers proceed concurrently.
    lock: RwLock<()>,
}

impl WorkspaceManager {
    /// Open (creating if needed) a workspace rooted at `base_dir` with no
    /// write permissions configured.
    pub fn new(base_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir)?;
        let base_dir = base_dir.canonicalize()?;
        Ok(WorkspaceManager {
            base_dir,
            write_roots: HashMap::new(),
            lock: RwLock::new(()),
        })
    }

    /// Open a generation workspace: standard directory tree plus the
    /// per-role write permissions.
    pub fn for_generation(base_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut ws = Self::new(base_dir)?;
        for dir in STANDARD_DIRS {
            std::fs::create_dir_all(ws.base_dir.join(dir))?;
        }
        for (agent, root) in [
            ("design", "design"),
            ("database", "app/database"),
            ("backend", "app/backend"),
            ("frontend", "app/frontend"),
            ("task", "tasks"),
            ("orchestrator", "docker"),
        ] {
            ws.write_roots.insert(agent.to_string(), PathBuf::from(root));
        }
        Ok(ws)
    }

    /// Grant `agent_id` write access under `root` (relative to the base).
    pub fn set_write_root(&mut self, agent_id: &str, root: impl Into<PathBuf>) {
        self.write_roots.insert(agent_id.to_string(), root.into());
    }

    /// The write-root for an agent, or `None` for read-only agents.
    pub fn write_root(&self, agent_id: &str) -> Option<&Path> {
        self.write_roots.get(agent_id).map(|p| p.as_path())
    }

    /// Read a file as text. Any agent may read any path under the root.
    pub fn read(&self, path: &str, agent_id: &str) -> Result<String, WorkspaceError> {
        let (abs, rel) = self.resolve(path)?;
        let _guard = self.lock.read().unwrap();
        if !abs.is_file() {
            return Err(WorkspaceError::NotFound(rel.display().to_string()));
        }
        debug!(agent = agent_id, path = %rel.display(), "read");
        std::fs::read_to_string(&abs).map_err(|e| {
            error!(agent = agent_id, path = %rel.display(), error = %e, "read failed");
            WorkspaceError::Io(e)
        })
    }

    /// Write a file. Succeeds only inside the agent's write-root.
    ///
    /// Denied writes are logged with the agent and the attempted path and
    /// reported as `Denied` — callers treat that as data, not as a fault.
    pub fn write(&self, path: &str, content: &str, agent_id: &str) -> Result<(), WorkspaceError> {
        let (abs, rel) = self.resolve(path)?;

        let allowed = self
            .write_roots
            .get(agent_id)
            .map(|root| rel.starts_with(root))
            .unwrap_or(false);
        if !allowed {
            warn!(
                agent = agent_id,
                path = %rel.display(),
                write_root = ?self.write_roots.get(agent_id),
                "write denied"
            );
            return Err(WorkspaceError::Denied {
                agent: agent_id.to_string(),
                path: rel.display().to_string(),
            });
        }

        let _guard = self.lock.write().unwrap();
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&abs, content)?;
        debug!(agent = agent_id, path = %rel.display(), bytes = content.len(), "wrote");
        Ok(())
    }

    /// List files under `dir` recursively, as sorted workspace-relative
    /// paths. Unrestricted; an absent directory yields an empty list.
    pub fn list(&self, dir: &str, _agent_id: &str) -> Result<Vec<String>, WorkspaceError> {
        let (abs, _) = if dir.is_empty() {
            (self.base_dir.clone(), PathBuf::new())
        } else {
            self.resolve(dir)?
        };
        let _guard = self.lock.read().unwrap();
        let mut files = Vec::new();
        if abs.is_dir() {
            collect_files(&abs, &self.base_dir, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    /// Whether a workspace-relative path currently exists.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|(abs, _)| abs.exists()).unwrap_or(false)
    }

    /// Absolute path of the workspace root (for process cwd, not file access).
    pub fn root_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Normalize an input path into `(absolute, workspace-relative)` form.
    ///
    /// Rejects anything that leaves the root: lexically (counting `..`
    /// against the root) and physically (canonicalizing the deepest existing
    /// ancestor so symlinks cannot smuggle the path outside).
    fn resolve(&self, path: &str) -> Result<(PathBuf, PathBuf), WorkspaceError> {
        let input = Path::new(path);
        let candidate = if input.is_absolute() {
            input
                .strip_prefix(&self.base_dir)
                .map_err(|_| WorkspaceError::Escape(path.to_string()))?
                .to_path_buf()
        } else {
            input.to_path_buf()
        };

        let mut rel = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::Normal(c) => rel.push(c),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !rel.pop() {
                        return Err(WorkspaceError::Escape(path.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::Escape(path.to_string()));
                }
            }
        }

        let abs = self.base_dir.join(&rel);

        // Symlink guard: canonicalize the deepest existing ancestor.
        let mut probe = abs.clone();
        loop {
            if probe.exists() {
                let canon = probe.canonicalize()?;
                if !canon.starts_with(&self.base_dir) {
                    return Err(WorkspaceError::Escape(path.to_string()));
                }
                break;
            }
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => return Err(WorkspaceError::Escape(path.to_string())),
            }
        }

        Ok((abs, rel))
    }
}

fn collect_files(dir: &Path, base: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, base, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.display().to_string());
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_workspace() -> (WorkspaceManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::for_generation(dir.path()).unwrap();
        (ws, dir)
    }

    #[test]
    fn test_standard_dirs_created() {
        let (ws, _dir) = make_workspace();
        for d in ["design", "app/database", "app/backend/routes", "docker", "screenshots"] {
            assert!(ws.root_dir().join(d).is_dir(), "missing {d}");
        }
    }

    #[test]
    fn test_write_inside_own_root() {
        let (ws, _dir) = make_workspace();
        ws.write("design/spec.api.json", "{}", "design").unwrap();
        assert_eq!(ws.read("design/spec.api.json", "backend").unwrap(), "{}");
    }

    #[test]
    fn test_write_outside_root_denied_and_untouched() {
        let (ws, _dir) = make_workspace();
        let result = ws.write("app/backend/server.js", "...", "design");
        assert!(matches!(result, Err(ref e) if e.is_denied()));
        // Filesystem unchanged
        assert!(!ws.root_dir().join("app/backend/server.js").exists());
    }

    #[test]
    fn test_user_agent_has_no_write_rights() {
        let (ws, _dir) = make_workspace();
        assert!(ws.write_root("user").is_none());
        let result = ws.write("design/notes.md", "x", "user");
        assert!(matches!(result, Err(ref e) if e.is_denied()));
    }

    #[test]
    fn test_all_agents_can_read_everywhere() {
        let (ws, _dir) = make_workspace();
        ws.write("app/database/schema.sql", "CREATE TABLE t ();", "database")
            .unwrap();
        assert!(ws.read("app/database/schema.sql", "frontend").is_ok());
        assert!(ws.read("app/database/schema.sql", "user").is_ok());
    }

    #[test]
    fn test_parent_dir_escape_rejected() {
        let (ws, _dir) = make_workspace();
        assert!(matches!(
            ws.read("../secrets.txt", "user"),
            Err(WorkspaceError::Escape(_))
        ));
        assert!(matches!(
            ws.write("design/../../outside.txt", "x", "design"),
            Err(WorkspaceError::Escape(_))
        ));
    }

    #[test]
    fn test_internal_parent_dir_collapses() {
        let (ws, _dir) = make_workspace();
        // design/sub/../file.txt normalizes to design/file.txt — inside the root
        ws.write("design/sub/../file.txt", "ok", "design").unwrap();
        assert_eq!(ws.read("design/file.txt", "user").unwrap(), "ok");
    }

    #[test]
    fn test_collapse_cannot_bypass_write_root() {
        let (ws, _dir) = make_workspace();
        // Normalizes to app/backend/sneaky.js, which design may not touch
        let result = ws.write("design/../app/backend/sneaky.js", "x", "design");
        assert!(matches!(result, Err(ref e) if e.is_denied()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), "secret").unwrap();

        let ws_root = dir.path().join("ws");
        let ws = WorkspaceManager::for_generation(&ws_root).unwrap();
        std::os::unix::fs::symlink(&outside, ws_root.join("design/link")).unwrap();

        assert!(matches!(
            ws.read("design/link/secret.txt", "user"),
            Err(WorkspaceError::Escape(_))
        ));
        assert!(matches!(
            ws.write("design/link/evil.txt", "x", "design"),
            Err(WorkspaceError::Escape(_))
        ));
        assert!(!outside.join("evil.txt").exists());
    }

    #[test]
    fn test_read_not_found() {
        let (ws, _dir) = make_workspace();
        assert!(matches!(
            ws.read("design/missing.json", "user"),
            Err(WorkspaceError::NotFound(_))
        ));
    }

    #[test]
    fn test_write_creates_intermediate_dirs() {
        let (ws, _dir) = make_workspace();
        ws.write("app/frontend/src/pages/deep/Login.jsx", "<div/>", "frontend")
            .unwrap();
        assert!(ws.exists("app/frontend/src/pages/deep/Login.jsx"));
    }

    #[test]
    fn test_list_recursive_sorted() {
        let (ws, _dir) = make_workspace();
        ws.write("design/spec.ui.json", "{}", "design").unwrap();
        ws.write("design/spec.api.json", "{}", "design").unwrap();

        let files = ws.list("design", "user").unwrap();
        assert_eq!(files, vec!["design/spec.api.json", "design/spec.ui.json"]);
    }

    #[test]
    fn test_list_missing_dir_empty() {
        let (ws, _dir) = make_workspace();
        assert!(ws.list("design/nothing-here", "user").unwrap().is_empty());
    }

    #[test]
    fn test_absolute_path_inside_root_accepted() {
        let (ws, _dir) = make_workspace();
        ws.write("design/abs.txt", "v", "design").unwrap();
        let abs = ws.root_dir().join("design/abs.txt");
        assert_eq!(ws.read(abs.to_str().unwrap(), "user").unwrap(), "v");
    }

    #[test]
    fn test_absolute_path_outside_root_rejected() {
        let (ws, _dir) = make_workspace();
        assert!(matches!(
            ws.read("/etc/hostname", "user"),
            Err(WorkspaceError::Escape(_))
        ));
    }
}
