//! Process tools — everything the agents launch runs under the shared
//! ProcessManager, whether it finishes in milliseconds or serves until
//! shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use envforge_core::config::ToolCategory;
use envforge_core::ports::PortAllocator;
use envforge_core::process::{ProcessManager, ProcessStatus, ProcessType, StartOptions};

use super::base::{optional_bool, optional_string, optional_u64, require_string, Tool, ToolResult};

/// Maximum rendered output length before truncation (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Default exec timeout in seconds.
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 60;

/// Dangerous command patterns that are always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\s+/\S*",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

fn deny_regexes() -> Vec<Regex> {
    DENY_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

fn truncate_output(mut output: String) -> String {
    if output.len() > MAX_OUTPUT_LEN {
        let remaining = output.len() - MAX_OUTPUT_LEN;
        let mut cut = MAX_OUTPUT_LEN;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str(&format!("\n... (truncated, {remaining} more chars)"));
    }
    output
}

// ─────────────────────────────────────────────
// ExecTool
// ─────────────────────────────────────────────

/// Run a shell command to completion and return its output.
pub struct ExecTool {
    processes: Arc<ProcessManager>,
    working_dir: PathBuf,
    timeout: Duration,
    deny: Vec<Regex>,
}

impl ExecTool {
    pub fn new(processes: Arc<ProcessManager>, working_dir: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            processes,
            working_dir,
            timeout: timeout.unwrap_or(Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS)),
            deny: deny_regexes(),
        }
    }

    /// Returns an error message if the command trips the safety guard.
    fn guard_command(&self, command: &str) -> Option<String> {
        let lower = command.to_lowercase();
        for re in &self.deny {
            if re.is_match(&lower) {
                warn!(command, "command blocked by safety guard");
                return Some("Command blocked by safety guard (dangerous pattern detected)".into());
            }
        }
        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return its output. Use \
         for installs, builds, linters, and quick checks; use run_background \
         for servers."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory relative to the workspace root (optional)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let command = match require_string(&params, "command") {
            Ok(v) => v,
            Err(e) => return e,
        };
        if let Some(blocked) = self.guard_command(&command) {
            return ToolResult::err(blocked);
        }

        let cwd = match optional_string(&params, "cwd") {
            Some(rel) => self.working_dir.join(rel),
            None => self.working_dir.clone(),
        };

        info!(command = %command, cwd = %cwd.display(), "exec");

        let record = match self
            .processes
            .start(&command, &cwd, StartOptions {
                timeout: Some(self.timeout),
                ..Default::default()
            })
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolResult::err(e.to_string()),
        };
        let key = record.pid.to_string();

        // The watchdog enforces the deadline; the extra margin covers the
        // SIGTERM→SIGKILL escalation.
        let wait_budget = self.timeout + Duration::from_secs(10);
        let exit_code = match self.processes.wait(&key, Some(wait_budget)).await {
            Ok(code) => code,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let status = self.processes.status(&key);
        if matches!(status.map(|s| s.status), Some(ProcessStatus::Timeout)) {
            return ToolResult::err(format!(
                "Command timed out after {} seconds",
                self.timeout.as_secs()
            ));
        }

        let mut output = self.processes.output(&key, usize::MAX);
        if output.is_empty() {
            output = "(no output)".to_string();
        }
        if let Some(code) = exit_code {
            if code != 0 {
                output.push_str(&format!("\nExit code: {code}"));
            }
        }
        ToolResult::text(truncate_output(output))
    }
}

// ─────────────────────────────────────────────
// RunBackgroundTool
// ─────────────────────────────────────────────

/// Start a long-lived process (server or worker) under supervision.
pub struct RunBackgroundTool {
    processes: Arc<ProcessManager>,
    working_dir: PathBuf,
}

impl RunBackgroundTool {
    pub fn new(processes: Arc<ProcessManager>, working_dir: PathBuf) -> Self {
        Self {
            processes,
            working_dir,
        }
    }
}

#[async_trait]
impl Tool for RunBackgroundTool {
    fn name(&self) -> &str {
        "run_background"
    }

    fn description(&self) -> &str {
        "Start a long-running process (e.g. a dev server) in the background. \
         Give it a name so you can stop it or read its output later; give it \
         a port so startup fails fast if the port is taken."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run"
                },
                "name": {
                    "type": "string",
                    "description": "Unique name for later stop/output/wait calls"
                },
                "port": {
                    "type": "integer",
                    "description": "Port the process will bind (checked before launch)"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory relative to the workspace root (optional)"
                }
            },
            "required": ["command", "name"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let command = match require_string(&params, "command") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let name = match require_string(&params, "name") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let port = optional_u64(&params, "port").map(|p| p as u16);
        let cwd = match optional_string(&params, "cwd") {
            Some(rel) => self.working_dir.join(rel),
            None => self.working_dir.clone(),
        };

        let process_type = if port.is_some() {
            ProcessType::Server
        } else {
            ProcessType::Background
        };

        match self
            .processes
            .start(&command, &cwd, StartOptions {
                name: Some(name.clone()),
                port,
                process_type: Some(process_type),
                ..Default::default()
            })
            .await
        {
            Ok(record) => ToolResult::text(format!(
                "Started '{name}' (pid {}){}",
                record.pid,
                port.map(|p| format!(" on port {p}")).unwrap_or_default()
            )),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────
// Stop / interrupt / list / output / wait
// ─────────────────────────────────────────────

/// Stop a supervised process by name or pid.
pub struct StopProcessTool {
    processes: Arc<ProcessManager>,
}

impl StopProcessTool {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for StopProcessTool {
    fn name(&self) -> &str {
        "stop_process"
    }

    fn description(&self) -> &str {
        "Stop a background process by name or pid. Set force=true to kill \
         immediately instead of terminating gracefully."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process": {
                    "type": "string",
                    "description": "Process name or pid"
                },
                "force": {
                    "type": "boolean",
                    "description": "Kill instead of terminate (default false)"
                }
            },
            "required": ["process"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let key = match require_string(&params, "process") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let force = optional_bool(&params, "force");
        match self.processes.stop(&key, force) {
            Ok(()) => ToolResult::text(format!("Stop signal sent to '{key}'")),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

/// Send Ctrl-C to a supervised process.
pub struct InterruptProcessTool {
    processes: Arc<ProcessManager>,
}

impl InterruptProcessTool {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for InterruptProcessTool {
    fn name(&self) -> &str {
        "interrupt_process"
    }

    fn description(&self) -> &str {
        "Send an interrupt (Ctrl-C) to a background process by name or pid."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process": {
                    "type": "string",
                    "description": "Process name or pid"
                }
            },
            "required": ["process"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let key = match require_string(&params, "process") {
            Ok(v) => v,
            Err(e) => return e,
        };
        match self.processes.interrupt(&key) {
            Ok(()) => ToolResult::text(format!("Interrupt sent to '{key}'")),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

/// List every supervised process and its status.
pub struct ListProcessesTool {
    processes: Arc<ProcessManager>,
}

impl ListProcessesTool {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for ListProcessesTool {
    fn name(&self) -> &str {
        "list_processes"
    }

    fn description(&self) -> &str {
        "List all supervised processes with pid, name, status, and exit code."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _params: HashMap<String, Value>) -> ToolResult {
        let records = self.processes.list();
        if records.is_empty() {
            return ToolResult::text("(no processes)");
        }
        let lines: Vec<String> = records
            .iter()
            .map(|r| {
                format!(
                    "pid {} [{}] {:?} — {}{}",
                    r.pid,
                    r.name.as_deref().unwrap_or("-"),
                    r.status,
                    r.command,
                    r.exit_code.map(|c| format!(" (exit {c})")).unwrap_or_default()
                )
            })
            .collect();
        ToolResult::text(lines.join("\n"))
    }
}

/// Read captured output from a supervised process.
pub struct ProcessOutputTool {
    processes: Arc<ProcessManager>,
}

impl ProcessOutputTool {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for ProcessOutputTool {
    fn name(&self) -> &str {
        "process_output"
    }

    fn description(&self) -> &str {
        "Read the last captured output lines of a process by name or pid."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process": {
                    "type": "string",
                    "description": "Process name or pid"
                },
                "lines": {
                    "type": "integer",
                    "description": "How many trailing lines (default 50)"
                }
            },
            "required": ["process"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let key = match require_string(&params, "process") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let lines = optional_u64(&params, "lines").unwrap_or(50) as usize;
        let output = self.processes.output(&key, lines);
        if output.is_empty() {
            ToolResult::text("(no output)")
        } else {
            ToolResult::text(truncate_output(output))
        }
    }
}

/// Block until a process exits.
pub struct WaitProcessTool {
    processes: Arc<ProcessManager>,
}

impl WaitProcessTool {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for WaitProcessTool {
    fn name(&self) -> &str {
        "wait_process"
    }

    fn description(&self) -> &str {
        "Wait for a process to finish and return its exit code."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process": {
                    "type": "string",
                    "description": "Process name or pid"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Seconds to wait (default 60)"
                }
            },
            "required": ["process"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let key = match require_string(&params, "process") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let timeout = Duration::from_secs(optional_u64(&params, "timeout").unwrap_or(60));
        match self.processes.wait(&key, Some(timeout)).await {
            Ok(Some(code)) => ToolResult::text(format!("Process '{key}' exited with code {code}")),
            Ok(None) => ToolResult::text(format!("Process '{key}' was terminated")),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────
// Ports
// ─────────────────────────────────────────────

/// Reserve a free TCP port.
pub struct FindFreePortTool {
    ports: Arc<PortAllocator>,
}

impl FindFreePortTool {
    pub fn new(ports: Arc<PortAllocator>) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl Tool for FindFreePortTool {
    fn name(&self) -> &str {
        "find_free_port"
    }

    fn description(&self) -> &str {
        "Reserve and return a free TCP port. Ports handed out earlier in this \
         run are never returned again."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "preferred": {
                    "type": "integer",
                    "description": "Port to try first (optional)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let preferred: Vec<u16> = optional_u64(&params, "preferred")
            .map(|p| vec![p as u16])
            .unwrap_or_default();
        match self.ports.allocate_default(&preferred) {
            Ok(port) => ToolResult::ok(json!({ "port": port })),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

/// Kill whatever holds a port (best-effort).
pub struct CleanupPortTool {
    processes: Arc<ProcessManager>,
}

impl CleanupPortTool {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for CleanupPortTool {
    fn name(&self) -> &str {
        "cleanup_port"
    }

    fn description(&self) -> &str {
        "Kill whatever external process is bound to a port. Best-effort; use \
         when a stale server blocks a port you need."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Process
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "port": {
                    "type": "integer",
                    "description": "The TCP port to free"
                }
            },
            "required": ["port"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let Some(port) = optional_u64(&params, "port").map(|p| p as u16) else {
            return ToolResult::err("Missing required parameter: port");
        };
        self.processes.cleanup_port(port).await;
        ToolResult::text(format!("Cleanup attempted for port {port}"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_params(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn setup() -> (Arc<ProcessManager>, tempfile::TempDir) {
        (Arc::new(ProcessManager::new()), tempfile::tempdir().unwrap())
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let (pm, dir) = setup();
        let tool = ExecTool::new(pm, dir.path().to_path_buf(), Some(Duration::from_secs(10)));
        let result = tool.execute(make_params(&[("command", "echo hello")])).await;
        assert!(result.success);
        assert!(result.render().contains("hello"));
    }

    #[tokio::test]
    async fn test_exec_exit_code_reported() {
        let (pm, dir) = setup();
        let tool = ExecTool::new(pm, dir.path().to_path_buf(), Some(Duration::from_secs(10)));
        let result = tool.execute(make_params(&[("command", "echo out; exit 42")])).await;
        assert!(result.success);
        assert!(result.render().contains("Exit code: 42"));
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let (pm, dir) = setup();
        let tool = ExecTool::new(pm, dir.path().to_path_buf(), Some(Duration::from_millis(200)));
        let result = tool.execute(make_params(&[("command", "sleep 30")])).await;
        assert!(!result.success);
        assert!(result.render().contains("timed out"));
    }

    #[test]
    fn test_guard_blocks_rm_rf_root() {
        let (pm, dir) = setup();
        let tool = ExecTool::new(pm, dir.path().to_path_buf(), None);
        assert!(tool.guard_command("rm -rf /").is_some());
        assert!(tool.guard_command("sudo shutdown -h now").is_some());
        assert!(tool.guard_command(":() { :|:& };:").is_some());
    }

    #[test]
    fn test_guard_allows_normal_commands() {
        let (pm, dir) = setup();
        let tool = ExecTool::new(pm, dir.path().to_path_buf(), None);
        assert!(tool.guard_command("npm install").is_none());
        assert!(tool.guard_command("ls -la").is_none());
        assert!(tool.guard_command("node server.js").is_none());
        // Deleting inside the workspace is allowed
        assert!(tool.guard_command("rm -rf node_modules").is_none());
    }

    #[tokio::test]
    async fn test_run_background_and_stop() {
        let (pm, dir) = setup();
        let run = RunBackgroundTool::new(pm.clone(), dir.path().to_path_buf());
        let stop = StopProcessTool::new(pm.clone());

        let result = run
            .execute(make_params(&[("command", "sleep 30"), ("name", "srv")]))
            .await;
        assert!(result.success);
        assert!(result.render().contains("Started 'srv'"));

        let result = stop.execute(make_params(&[("process", "srv")])).await;
        assert!(result.success);
        pm.wait("srv", Some(Duration::from_secs(5))).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_background_duplicate_name() {
        let (pm, dir) = setup();
        let run = RunBackgroundTool::new(pm.clone(), dir.path().to_path_buf());

        run.execute(make_params(&[("command", "sleep 30"), ("name", "dup")]))
            .await;
        let result = run
            .execute(make_params(&[("command", "sleep 30"), ("name", "dup")]))
            .await;
        assert!(!result.success);
        assert!(result.render().contains("already exists"));
        pm.cleanup_all();
    }

    #[tokio::test]
    async fn test_run_background_port_in_use() {
        let (pm, dir) = setup();
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let run = RunBackgroundTool::new(pm, dir.path().to_path_buf());
        let mut params = make_params(&[("command", "sleep 30"), ("name", "srv")]);
        params.insert("port".to_string(), json!(port));

        let result = run.execute(params).await;
        assert!(!result.success);
        assert!(result.render().contains("already in use"));
    }

    #[tokio::test]
    async fn test_list_and_output_tools() {
        let (pm, dir) = setup();
        let run = RunBackgroundTool::new(pm.clone(), dir.path().to_path_buf());
        run.execute(make_params(&[("command", "echo server up; sleep 30"), ("name", "api")]))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let list = ListProcessesTool::new(pm.clone());
        let listing = list.execute(HashMap::new()).await.render();
        assert!(listing.contains("api"));

        let output = ProcessOutputTool::new(pm.clone());
        let out = output.execute(make_params(&[("process", "api")])).await.render();
        assert!(out.contains("server up"));

        pm.cleanup_all();
    }

    #[tokio::test]
    async fn test_wait_process_tool() {
        let (pm, dir) = setup();
        let run = RunBackgroundTool::new(pm.clone(), dir.path().to_path_buf());
        run.execute(make_params(&[("command", "exit 7"), ("name", "quick")]))
            .await;

        let wait = WaitProcessTool::new(pm);
        let result = wait.execute(make_params(&[("process", "quick")])).await;
        assert!(result.render().contains("code 7"));
    }

    #[tokio::test]
    async fn test_find_free_port_tool() {
        let ports = Arc::new(PortAllocator::new());
        let tool = FindFreePortTool::new(ports);
        let result = tool.execute(HashMap::new()).await;
        assert!(result.success);
        assert!(result.render().contains("port"));
    }

    #[test]
    fn test_truncate_output() {
        let long = "x".repeat(MAX_OUTPUT_LEN + 100);
        let truncated = truncate_output(long);
        assert!(truncated.contains("truncated"));
        assert!(truncated.len() < MAX_OUTPUT_LEN + 60);
    }
}
