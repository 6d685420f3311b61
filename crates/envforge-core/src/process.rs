//! Process manager — unified supervisor for every child process the agents
//! launch, short-lived lint runs and long-lived servers alike.
//!
//! Each child runs in its own process group so signals reach the whole tree.
//! Combined stdout/stderr is captured line-wise into a bounded ring, a
//! watchdog task records the terminal transition exactly once, and an
//! optional timeout turns into SIGTERM (then SIGKILL after a grace period).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Output ring cap, in lines, per process.
pub const OUTPUT_RING_CAP: usize = 500;

/// How long a timed-out process gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────
// Errors and record types
// ─────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("a live process named '{0}' already exists")]
    Duplicate(String),
    #[error("port {0} is already in use")]
    PortInUse(u16),
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("no tracked process matches '{0}'")]
    Unknown(String),
    #[error("timed out waiting for process '{0}'")]
    WaitTimeout(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Server,
    Background,
    Container,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopped,
    Crashed,
    Timeout,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Stopped | ProcessStatus::Crashed | ProcessStatus::Timeout
        )
    }
}

/// Snapshot of a tracked child process.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub command: String,
    pub cwd: PathBuf,
    pub process_type: ProcessType,
    pub name: Option<String>,
    pub port: Option<u16>,
    pub status: ProcessStatus,
    /// Set iff the process exited on its own (not signal-killed).
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Callback fired exactly once when a process reaches a terminal state.
pub type OnExit = Box<dyn FnOnce(u32, Option<i32>) + Send + 'static>;

/// Options for [`ProcessManager::start`].
#[derive(Default)]
pub struct StartOptions {
    pub name: Option<String>,
    pub port: Option<u16>,
    pub timeout: Option<Duration>,
    pub process_type: Option<ProcessType>,
    pub on_exit: Option<OnExit>,
}

// ─────────────────────────────────────────────
// Internal entry
// ─────────────────────────────────────────────

struct ProcessEntry {
    record: Mutex<ProcessRecord>,
    output: Mutex<VecDeque<String>>,
    on_exit: Mutex<Option<OnExit>>,
    finished: AtomicBool,
    done_tx: watch::Sender<bool>,
}

impl ProcessEntry {
    fn push_line(&self, line: String) {
        let mut ring = self.output.lock().unwrap();
        ring.push_back(line);
        while ring.len() > OUTPUT_RING_CAP {
            ring.pop_front();
        }
    }

    /// Record the terminal transition. `finished_at` is set once and the
    /// `on_exit` callback fires once, no matter how we got here.
    fn finalize(&self, status: ProcessStatus, exit_code: Option<i32>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let pid;
        {
            let mut record = self.record.lock().unwrap();
            // A provisional Timeout set at the deadline wins over the
            // subsequent natural-exit classification.
            if record.status != ProcessStatus::Timeout {
                record.status = status;
            }
            record.exit_code = exit_code;
            if record.finished_at.is_none() {
                record.finished_at = Some(Utc::now());
            }
            pid = record.pid;
        }
        if let Some(callback) = self.on_exit.lock().unwrap().take() {
            callback(pid, exit_code);
        }
        self.done_tx.send_replace(true);
    }
}

// ─────────────────────────────────────────────
// ProcessManager
// ─────────────────────────────────────────────

struct Registry {
    processes: HashMap<u32, Arc<ProcessEntry>>,
    names: HashMap<String, u32>,
}

/// Supervisor for all child processes of a run. Owned by the orchestrator,
/// shared with agents via `Arc`.
pub struct ProcessManager {
    registry: Mutex<Registry>,
}

impl ProcessManager {
    pub fn new() -> Self {
        ProcessManager {
            registry: Mutex::new(Registry {
                processes: HashMap::new(),
                names: HashMap::new(),
            }),
        }
    }

    /// Launch `command` through the shell with `cwd` as working directory.
    ///
    /// Fails synchronously on a duplicate live name or an occupied port; no
    /// process is spawned in either case.
    pub async fn start(
        &self,
        command: &str,
        cwd: &Path,
        opts: StartOptions,
    ) -> Result<ProcessRecord, ProcessError> {
        {
            let registry = self.registry.lock().unwrap();
            if let Some(name) = &opts.name {
                if let Some(pid) = registry.names.get(name) {
                    if let Some(entry) = registry.processes.get(pid) {
                        if !entry.finished.load(Ordering::Acquire) {
                            return Err(ProcessError::Duplicate(name.clone()));
                        }
                    }
                }
            }
        }
        if let Some(port) = opts.port {
            if !port_is_free(port) {
                return Err(ProcessError::PortInUse(port));
            }
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Spawn("child exited before it could be tracked".into()))?;

        let record = ProcessRecord {
            pid,
            command: command.to_string(),
            cwd: cwd.to_path_buf(),
            process_type: opts.process_type.unwrap_or(ProcessType::Background),
            name: opts.name.clone(),
            port: opts.port,
            status: ProcessStatus::Starting,
            exit_code: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        let snapshot = record.clone();

        let (done_tx, _) = watch::channel(false);
        let entry = Arc::new(ProcessEntry {
            record: Mutex::new(record),
            output: Mutex::new(VecDeque::new()),
            on_exit: Mutex::new(opts.on_exit),
            finished: AtomicBool::new(false),
            done_tx,
        });

        {
            let mut registry = self.registry.lock().unwrap();
            registry.processes.insert(pid, entry.clone());
            if let Some(name) = &opts.name {
                registry.names.insert(name.clone(), pid);
            }
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture_lines(stdout, entry.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture_lines(stderr, entry.clone()));
        }

        info!(pid, command, name = ?opts.name, port = ?opts.port, "process started");
        entry.record.lock().unwrap().status = ProcessStatus::Running;

        let timeout = opts.timeout;
        let watchdog_entry = entry.clone();
        tokio::spawn(async move {
            watchdog(child, pid, timeout, watchdog_entry).await;
        });

        Ok(snapshot)
    }

    /// Signal a process (and its group) to stop. Idempotent: a finished or
    /// already-signaled process is a no-op.
    pub fn stop(&self, key: &str, force: bool) -> Result<(), ProcessError> {
        let entry = self.resolve(key).ok_or_else(|| ProcessError::Unknown(key.into()))?;
        if entry.finished.load(Ordering::Acquire) {
            return Ok(());
        }
        let pid = entry.record.lock().unwrap().pid;
        let signal = if force { TermSignal::Kill } else { TermSignal::Term };
        debug!(pid, force, "stopping process");
        signal_group(pid, signal);
        Ok(())
    }

    /// Send SIGINT (Ctrl-C) to a process group.
    pub fn interrupt(&self, key: &str) -> Result<(), ProcessError> {
        let entry = self.resolve(key).ok_or_else(|| ProcessError::Unknown(key.into()))?;
        if entry.finished.load(Ordering::Acquire) {
            return Ok(());
        }
        let pid = entry.record.lock().unwrap().pid;
        signal_group(pid, TermSignal::Int);
        Ok(())
    }

    /// Wait for a process to reach a terminal state, returning its exit
    /// code (None if killed or timed out).
    pub async fn wait(&self, key: &str, timeout: Option<Duration>) -> Result<Option<i32>, ProcessError> {
        let entry = self.resolve(key).ok_or_else(|| ProcessError::Unknown(key.into()))?;
        let mut done_rx = entry.done_tx.subscribe();
        let wait_done = done_rx.wait_for(|done| *done);
        match timeout {
            Some(limit) => {
                tokio::time::timeout(limit, wait_done)
                    .await
                    .map_err(|_| ProcessError::WaitTimeout(key.into()))?
                    .ok();
            }
            None => {
                wait_done.await.ok();
            }
        }
        let exit_code = entry.record.lock().unwrap().exit_code;
        Ok(exit_code)
    }

    /// The last `last_n` captured output lines. Always succeeds; unknown
    /// keys yield an empty string.
    pub fn output(&self, key: &str, last_n: usize) -> String {
        let Some(entry) = self.resolve(key) else {
            return String::new();
        };
        let ring = entry.output.lock().unwrap();
        let skip = ring.len().saturating_sub(last_n);
        ring.iter().skip(skip).cloned().collect::<Vec<_>>().join("\n")
    }

    /// Snapshot of one tracked process.
    pub fn status(&self, key: &str) -> Option<ProcessRecord> {
        self.resolve(key).map(|e| e.record.lock().unwrap().clone())
    }

    /// Snapshots of every tracked process, ordered by pid.
    pub fn list(&self) -> Vec<ProcessRecord> {
        let registry = self.registry.lock().unwrap();
        let mut records: Vec<ProcessRecord> = registry
            .processes
            .values()
            .map(|e| e.record.lock().unwrap().clone())
            .collect();
        records.sort_by_key(|r| r.pid);
        records
    }

    /// Best-effort: kill whatever external process holds `port`, using the
    /// host's `lsof`.
    pub async fn cleanup_port(&self, port: u16) {
        let script = format!("lsof -ti tcp:{port} | xargs -r kill -9");
        match Command::new("sh").arg("-c").arg(&script).output().await {
            Ok(_) => debug!(port, "port cleanup attempted"),
            Err(e) => warn!(port, error = %e, "port cleanup unavailable"),
        }
    }

    /// Force-stop every tracked process.
    pub fn cleanup_all(&self) {
        let entries: Vec<Arc<ProcessEntry>> = {
            let registry = self.registry.lock().unwrap();
            registry.processes.values().cloned().collect()
        };
        for entry in entries {
            if !entry.finished.load(Ordering::Acquire) {
                let pid = entry.record.lock().unwrap().pid;
                signal_group(pid, TermSignal::Kill);
            }
        }
    }

    /// Stop everything and forget all records. Watchdog tasks terminate as
    /// their children die.
    pub fn reset(&self) {
        self.cleanup_all();
        let mut registry = self.registry.lock().unwrap();
        registry.processes.clear();
        registry.names.clear();
    }

    /// Look an entry up by name, then by pid string.
    fn resolve(&self, key: &str) -> Option<Arc<ProcessEntry>> {
        let registry = self.registry.lock().unwrap();
        if let Some(pid) = registry.names.get(key) {
            return registry.processes.get(pid).cloned();
        }
        key.parse::<u32>()
            .ok()
            .and_then(|pid| registry.processes.get(&pid).cloned())
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Watchdog and capture tasks
// ─────────────────────────────────────────────

async fn watchdog(
    mut child: tokio::process::Child,
    pid: u32,
    timeout: Option<Duration>,
    entry: Arc<ProcessEntry>,
) {
    let exit_status = match timeout {
        Some(deadline) => match tokio::time::timeout(deadline, child.wait()).await {
            Ok(result) => result.ok(),
            Err(_) => {
                // Deadline hit: mark timed out, terminate the group, escalate.
                warn!(pid, ?deadline, "process deadline exceeded");
                entry.record.lock().unwrap().status = ProcessStatus::Timeout;
                signal_group(pid, TermSignal::Term);
                if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                    signal_group(pid, TermSignal::Kill);
                    let _ = child.wait().await;
                }
                entry.finalize(ProcessStatus::Timeout, None);
                return;
            }
        },
        None => child.wait().await.ok(),
    };

    let (status, code) = match exit_status {
        Some(s) => match s.code() {
            Some(0) => (ProcessStatus::Stopped, Some(0)),
            Some(n) => (ProcessStatus::Crashed, Some(n)),
            // Killed by a signal: stopped externally, no own exit code.
            None => (ProcessStatus::Stopped, None),
        },
        None => (ProcessStatus::Crashed, None),
    };
    debug!(pid, ?status, ?code, "process exited");
    entry.finalize(status, code);
}

async fn capture_lines<R: AsyncRead + Unpin>(pipe: R, entry: Arc<ProcessEntry>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        entry.push_line(line);
    }
}

// ─────────────────────────────────────────────
// Ports and signals
// ─────────────────────────────────────────────

/// Probe whether `port` is free by binding and closing it on 127.0.0.1.
pub fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[derive(Clone, Copy, Debug)]
enum TermSignal {
    Term,
    Int,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: TermSignal) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        TermSignal::Term => Signal::SIGTERM,
        TermSignal::Int => Signal::SIGINT,
        TermSignal::Kill => Signal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
        debug!(pid, signal = ?signal, error = %e, "signal delivery failed");
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32, signal: TermSignal) {
    debug!(pid, signal = ?signal, "signals unsupported on this platform");
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
