//! Agent runtime — the state machine every specialized agent runs on.
//!
//! Two external drivers: tasks dispatched by the orchestrator and messages
//! delivered by peers. One internal driver: the LLM loop deciding which
//! tool to call next. Answers complete pending asks without an LLM call;
//! questions trigger exactly one; a task runs a bounded LLM↔tool loop until
//! `finish` (or `deliver_project` on the User agent) is accepted, the task
//! times out, or shutdown arrives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use envforge_core::bus::{AgentMessage, BusError, Mailbox, MessageBus, MessageKind};
use envforge_core::config::{AgentConfig, AgentRole};
use envforge_core::context::GenerationContext;
use envforge_core::events::{EventEmitter, EventType};
use envforge_core::ports::PortAllocator;
use envforge_core::process::ProcessManager;
use envforge_core::types::{ChatMessage, ContentPart, ImageUrl, LlmResponse, ToolDefinition};
use envforge_core::workspace::WorkspaceManager;
use envforge_providers::{LlmClient, LlmRequestConfig};

use crate::comms::{Comms, PeerInfo};
use crate::memory::AgentMemory;
use crate::prompts::PromptLibrary;
use crate::roles::{self, ToolContext};
use crate::tools::registry::ToolRegistry;

/// Upper bound on LLM↔tool iterations for one task.
const MAX_TASK_ITERATIONS: usize = 40;

/// Default exec-tool timeout.
const EXEC_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// How long an in-flight task gets to observe shutdown before it is aborted.
const TASK_CANCEL_GRACE: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────
// AgentState
// ─────────────────────────────────────────────

/// Mutable flags shared between the runtime and the control tools.
pub struct AgentState {
    plan: Mutex<Vec<String>>,
    plan_complete: AtomicBool,
    finished: AtomicBool,
    delivered_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    ready_tx: watch::Sender<bool>,
}

impl AgentState {
    pub fn new() -> Self {
        AgentState {
            plan: Mutex::new(Vec::new()),
            plan_complete: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            delivered_tx: watch::channel(false).0,
            shutdown_tx: watch::channel(false).0,
            ready_tx: watch::channel(false).0,
        }
    }

    /// Record a plan. A new plan always needs a fresh verification.
    pub fn record_plan(&self, steps: Vec<String>) {
        *self.plan.lock().unwrap() = steps;
        self.plan_complete.store(false, Ordering::Release);
    }

    pub fn has_plan(&self) -> bool {
        !self.plan.lock().unwrap().is_empty()
    }

    pub fn plan_steps(&self) -> Vec<String> {
        self.plan.lock().unwrap().clone()
    }

    pub fn mark_plan_complete(&self) {
        self.plan_complete.store(true, Ordering::Release);
    }

    pub fn plan_complete(&self) -> bool {
        self.plan_complete.load(Ordering::Acquire)
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Clear the per-task flags before running a new task.
    pub fn reset_for_task(&self) {
        self.finished.store(false, Ordering::Release);
    }

    pub fn mark_delivered(&self) {
        self.delivered_tx.send_replace(true);
    }

    pub fn delivered(&self) -> bool {
        *self.delivered_tx.borrow()
    }

    pub fn delivered_handle(&self) -> watch::Receiver<bool> {
        self.delivered_tx.subscribe()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn shutdown_handle(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    pub fn ready_handle(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// TaskSpec and wiring
// ─────────────────────────────────────────────

/// A unit of work dispatched to an agent.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub payload: String,
    pub reference_images: Vec<PathBuf>,
}

impl TaskSpec {
    pub fn text(payload: impl Into<String>) -> Self {
        TaskSpec {
            payload: payload.into(),
            reference_images: Vec::new(),
        }
    }
}

/// Shared collaborators handed to every agent by the orchestrator.
#[derive(Clone)]
pub struct AgentDeps {
    pub llm: Arc<dyn LlmClient>,
    pub workspace: Arc<WorkspaceManager>,
    pub bus: Arc<MessageBus>,
    pub processes: Arc<ProcessManager>,
    pub ports: Arc<PortAllocator>,
    pub events: Arc<EventEmitter>,
    pub context: Arc<GenerationContext>,
}

enum Flow {
    Continue,
    Stop,
}

// ─────────────────────────────────────────────
// AgentRuntime
// ─────────────────────────────────────────────

/// One agent: configuration, collaborators, tools, mailbox, and loops.
pub struct AgentRuntime {
    config: AgentConfig,
    role: AgentRole,
    llm: Arc<dyn LlmClient>,
    request_config: LlmRequestConfig,
    workspace: Arc<WorkspaceManager>,
    bus: Arc<MessageBus>,
    events: Arc<EventEmitter>,
    context: Arc<GenerationContext>,
    comms: Arc<Comms>,
    memory: Arc<AgentMemory>,
    state: Arc<AgentState>,
    tools: ToolRegistry,
    prompts: PromptLibrary,
    mailbox: Arc<Mailbox>,
    task_tx: mpsc::Sender<TaskSpec>,
    task_rx: tokio::sync::Mutex<mpsc::Receiver<TaskSpec>>,
    requirements: RwLock<HashMap<String, String>>,
    design_docs: RwLock<HashMap<String, String>>,
}

impl AgentRuntime {
    /// Create the agent: registers its mailbox on the bus and wires its
    /// role-filtered tool set. Peers are injected later via `set_peers`.
    pub fn new(
        role: AgentRole,
        config: AgentConfig,
        deps: AgentDeps,
        prompt_dir: Option<PathBuf>,
    ) -> Result<Arc<Self>, BusError> {
        let mailbox = deps.bus.register_agent(&config.agent_id)?;
        let comms = Arc::new(Comms::new(&config.agent_id, deps.bus.clone()));
        let memory = Arc::new(AgentMemory::new());
        let state = Arc::new(AgentState::new());

        let tool_ctx = ToolContext {
            agent_id: config.agent_id.clone(),
            workspace: deps.workspace.clone(),
            processes: deps.processes.clone(),
            ports: deps.ports.clone(),
            comms: comms.clone(),
            memory: memory.clone(),
            state: state.clone(),
            exec_timeout: EXEC_TOOL_TIMEOUT,
        };
        let tools = roles::build_registry(role, &tool_ctx);

        let (task_tx, task_rx) = mpsc::channel(8);

        info!(
            agent = %config.agent_id,
            tools = tools.len(),
            "agent created"
        );

        Ok(Arc::new(AgentRuntime {
            config,
            role,
            llm: deps.llm,
            request_config: LlmRequestConfig::default(),
            workspace: deps.workspace,
            bus: deps.bus,
            events: deps.events,
            context: deps.context,
            comms,
            memory,
            state,
            tools,
            prompts: PromptLibrary::new(prompt_dir),
            mailbox,
            task_tx,
            task_rx: tokio::sync::Mutex::new(task_rx),
            requirements: RwLock::new(HashMap::new()),
            design_docs: RwLock::new(HashMap::new()),
        }))
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.has(name)
    }

    /// Tell this agent who its peers are (ids and roles only — all contact
    /// goes through the bus).
    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        self.comms.set_peers(peers);
    }

    /// Orchestrator → agent task dispatch. Non-blocking.
    pub fn send_task(&self, task: TaskSpec) -> bool {
        self.task_tx.try_send(task).is_ok()
    }

    /// Block until the agent's loop has come up, or `timeout` elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.state.ready_handle();
        let result = tokio::time::timeout(timeout, ready.wait_for(|v| *v)).await;
        matches!(result, Ok(Ok(_)))
    }

    /// Ask the loop to exit. Pending asks are canceled so nothing blocks
    /// across shutdown.
    pub fn request_shutdown(&self) {
        self.state.request_shutdown();
        self.comms.cancel_pending();
    }

    /// The orchestrator's delivery wait-handle. Only the User agent ever
    /// completes it.
    pub fn delivered_handle(&self) -> watch::Receiver<bool> {
        self.state.delivered_handle()
    }

    /// Design documents accumulated from peer notifications.
    pub fn design_docs(&self) -> HashMap<String, String> {
        self.design_docs.read().unwrap().clone()
    }

    /// Requirements received from peers.
    pub fn requirements(&self) -> HashMap<String, String> {
        self.requirements.read().unwrap().clone()
    }

    // ────────────── Main loop ──────────────

    /// The agent's life: raise ready, then serve messages and tasks until
    /// shutdown or bus close. Drains the inbox on the way out.
    ///
    /// The current task runs as its own tokio task so the inbox keeps
    /// draining while the LLM loop works — an `ask_agent` issued mid-task
    /// is answered through this same loop. At most one task runs at a time;
    /// further dispatches queue.
    pub async fn run_loop(self: Arc<Self>) {
        self.state.mark_ready();
        info!(agent = %self.config.agent_id, "agent ready");

        let mut shutdown = self.state.shutdown_handle();
        let mut task_rx = self.task_rx.lock().await;
        let mut current_task: Option<JoinHandle<()>> = None;

        loop {
            let mut stop = false;
            let mut task_finished = false;

            if *shutdown.borrow() {
                debug!(agent = %self.config.agent_id, "shutdown requested");
                stop = true;
            } else if let Some(handle) = current_task.as_mut() {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!(agent = %self.config.agent_id, "shutdown requested");
                        stop = true;
                    }
                    msg = self.mailbox.recv() => {
                        match msg {
                            Some(m) => stop = matches!(self.handle_message(m).await, Flow::Stop),
                            None => stop = true,
                        }
                    }
                    _ = handle => {
                        task_finished = true;
                    }
                }
            } else {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!(agent = %self.config.agent_id, "shutdown requested");
                        stop = true;
                    }
                    msg = self.mailbox.recv() => {
                        match msg {
                            Some(m) => stop = matches!(self.handle_message(m).await, Flow::Stop),
                            None => stop = true,
                        }
                    }
                    task = task_rx.recv() => {
                        if let Some(task) = task {
                            let agent = self.clone();
                            current_task =
                                Some(tokio::spawn(async move { agent.execute_task(task).await }));
                        }
                    }
                }
            }

            if task_finished {
                current_task = None;
            }
            if stop {
                break;
            }
        }

        // An in-flight task observes shutdown between tool calls; give it a
        // moment, then cancel.
        if let Some(mut handle) = current_task.take() {
            if tokio::time::timeout(TASK_CANCEL_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        self.drain_inbox();
        info!(agent = %self.config.agent_id, "agent loop exited");
    }

    /// Discard whatever is left in the inbox so no shutdown signal (or
    /// stale low-priority traffic) outlives the loop.
    fn drain_inbox(&self) {
        let mut dropped = 0usize;
        while let Some(msg) = self.mailbox.try_recv() {
            if msg.kind != MessageKind::Shutdown {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(agent = %self.config.agent_id, dropped, "drained inbox on exit");
        }
    }

    async fn handle_message(&self, msg: AgentMessage) -> Flow {
        match msg.kind {
            MessageKind::Answer => {
                let matched = msg
                    .correlation_id
                    .as_deref()
                    .map(|cid| self.comms.complete(cid, msg.payload.clone()))
                    .unwrap_or(false);
                if !matched {
                    warn!(
                        agent = %self.config.agent_id,
                        from = %msg.source,
                        "unmatched answer dropped"
                    );
                }
                Flow::Continue
            }
            MessageKind::Question => {
                self.answer_question(&msg).await;
                Flow::Continue
            }
            MessageKind::Notification | MessageKind::Status => {
                let subtype = msg
                    .metadata
                    .subtype
                    .clone()
                    .unwrap_or_else(|| "note".to_string());
                debug!(
                    agent = %self.config.agent_id,
                    from = %msg.source,
                    subtype = %subtype,
                    "notification received"
                );
                if subtype == "requirements" {
                    self.requirements
                        .write()
                        .unwrap()
                        .insert(msg.source.clone(), msg.payload);
                } else {
                    self.design_docs
                        .write()
                        .unwrap()
                        .insert(format!("{}:{subtype}", msg.source), msg.payload);
                }
                Flow::Continue
            }
            MessageKind::Task => {
                // A peer (usually the User agent) delegating work. Queued
                // behind any task already running.
                if self.task_tx.try_send(TaskSpec::text(msg.payload)).is_err() {
                    warn!(agent = %self.config.agent_id, "task queue full, delegated task dropped");
                }
                Flow::Continue
            }
            MessageKind::Shutdown => {
                info!(agent = %self.config.agent_id, "shutdown message received");
                Flow::Stop
            }
        }
    }

    // ────────────── Questions ──────────────

    /// One LLM call, then an answer message carrying the question's
    /// correlation id back to the asker.
    async fn answer_question(&self, question: &AgentMessage) {
        let mut vars = HashMap::new();
        vars.insert("agent", self.config.agent_name.clone());
        vars.insert("from", question.source.clone());
        vars.insert("question", question.payload.clone());

        let prompt = self.prompts.render("answer_question", &vars).unwrap_or_else(|_| {
            format!(
                "Another agent ({from}) asks:\n\n{q}\n\nProvide a helpful, concise answer \
                 based on your expertise and the current state of the project.",
                from = question.source,
                q = question.payload,
            )
        });

        let messages = vec![
            ChatMessage::system(self.build_system_prompt()),
            ChatMessage::user(prompt),
        ];

        let answer_text = match self.generate_with_retry(&messages, None).await {
            Ok(response) => response
                .content
                .unwrap_or_else(|| "I have no answer for that yet.".to_string()),
            Err(e) => {
                warn!(agent = %self.config.agent_id, error = %e, "failed to answer question");
                format!("Unable to answer right now: {e}")
            }
        };

        let answer = AgentMessage::answer_to(question, &self.config.agent_id, answer_text);
        if let Err(e) = self.bus.send(answer).await {
            warn!(agent = %self.config.agent_id, error = %e, "failed to send answer");
        }
    }

    // ────────────── Tasks ──────────────

    async fn execute_task(&self, task: TaskSpec) {
        info!(agent = %self.config.agent_id, "task dispatched");
        let budget = self.config.execution.task_timeout;

        match tokio::time::timeout(budget, self.run_task_loop(&task)).await {
            Ok(Ok(())) => {
                debug!(agent = %self.config.agent_id, "task loop ended");
            }
            Ok(Err(e)) => {
                error!(agent = %self.config.agent_id, error = %e, "task failed");
                self.events.emit(
                    EventType::PhaseError,
                    format!("{} task failed", self.config.agent_id),
                    json!({"error": e.to_string()}),
                );
            }
            Err(_) => {
                warn!(agent = %self.config.agent_id, ?budget, "task timed out");
                self.events.emit(
                    EventType::PhaseError,
                    format!("{} task timed out", self.config.agent_id),
                    json!({"timeout_secs": budget.as_secs()}),
                );
            }
        }
    }

    /// The bounded LLM↔tool loop for one task.
    async fn run_task_loop(&self, task: &TaskSpec) -> anyhow::Result<()> {
        self.state.reset_for_task();

        let tool_defs = self.tools.definitions();
        let mut messages = vec![
            ChatMessage::system(self.build_system_prompt()),
            build_task_message(task),
        ];

        for iteration in 0..MAX_TASK_ITERATIONS {
            if self.state.shutdown_requested() {
                break;
            }

            let response = self
                .generate_with_retry(&messages, Some(&tool_defs))
                .await?;

            if response.has_tool_calls() {
                let tool_calls = response.tool_calls.clone();
                messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

                for call in &tool_calls {
                    let params: HashMap<String, Value> =
                        serde_json::from_str(&call.function.arguments).unwrap_or_default();

                    debug!(
                        agent = %self.config.agent_id,
                        tool = %call.function.name,
                        iteration,
                        "tool call"
                    );
                    self.events.emit(
                        EventType::ToolCall,
                        format!("{} → {}", self.config.agent_id, call.function.name),
                        json!({"tool": call.function.name}),
                    );

                    let result = self.tools.execute(&call.function.name, params).await;
                    let rendered = result.render();

                    self.memory
                        .record_operation(&call.function.name, summary_of(&rendered));
                    self.events.emit(
                        EventType::ToolResult,
                        format!("{} ← {}", self.config.agent_id, call.function.name),
                        json!({"tool": call.function.name, "success": result.success}),
                    );

                    messages.push(ChatMessage::tool_result(&call.id, &rendered));

                    if self.state.finished()
                        || self.state.delivered()
                        || self.state.shutdown_requested()
                    {
                        return Ok(());
                    }
                }
            } else {
                // Free text without a tool call is a think step.
                if let Some(text) = response.content {
                    self.events.emit(
                        EventType::ThinkResult,
                        format!("{} thinking", self.config.agent_id),
                        json!({"chars": text.len()}),
                    );
                    messages.push(ChatMessage::assistant(text));
                }
                messages.push(ChatMessage::user(
                    "Continue with your plan. Call a tool, and end the task with the \
                     finish tool once your plan is verified.",
                ));
            }
        }

        warn!(
            agent = %self.config.agent_id,
            "task loop ended without finish (iteration budget exhausted)"
        );
        Ok(())
    }

    /// Retry transient LLM failures up to `max_retries`, then surface.
    async fn generate_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<LlmResponse> {
        let mut attempt = 0u32;
        loop {
            match self.llm.generate(messages, tools, &self.request_config).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.execution.max_retries => {
                    attempt += 1;
                    warn!(
                        agent = %self.config.agent_id,
                        attempt,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_system_prompt(&self) -> String {
        roles::system_prompt(
            self.role,
            &self.context,
            &self.comms.peers(),
            self.workspace
                .write_root(&self.config.agent_id)
                .and_then(|p| p.to_str()),
        )
    }
}

// ─────────────────────────────────────────────
// Task message helpers
// ─────────────────────────────────────────────

/// Build the user message for a task, attaching reference images as base64
/// data URIs when present.
fn build_task_message(task: &TaskSpec) -> ChatMessage {
    if task.reference_images.is_empty() {
        return ChatMessage::user(&task.payload);
    }

    let mut parts = Vec::new();
    for path in &task.reference_images {
        if let Ok(data) = std::fs::read(path) {
            let mime = guess_mime(path);
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{mime};base64,{}", base64_encode(&data)),
                    detail: None,
                },
            });
        }
    }
    parts.push(ContentPart::Text {
        text: task.payload.clone(),
    });
    ChatMessage::user_parts(parts)
}

fn summary_of(rendered: &str) -> &str {
    let end = rendered
        .char_indices()
        .take_while(|(i, _)| *i < 120)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &rendered[..end]
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "image/jpeg",
    }
}

/// Standard-alphabet base64; small enough not to warrant a dependency.
fn base64_encode(data: &[u8]) -> String {
    const CHARSET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    let mut chunks = data.chunks_exact(3);
    for chunk in chunks.by_ref() {
        let group = u32::from_be_bytes([0, chunk[0], chunk[1], chunk[2]]);
        for shift in [18u32, 12, 6, 0] {
            out.push(CHARSET[(group >> shift) as usize & 0x3F] as char);
        }
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut group = u32::from(tail[0]) << 16;
        if tail.len() == 2 {
            group |= u32::from(tail[1]) << 8;
        }
        out.push(CHARSET[(group >> 18) as usize & 0x3F] as char);
        out.push(CHARSET[(group >> 12) as usize & 0x3F] as char);
        if tail.len() == 2 {
            out.push(CHARSET[(group >> 6) as usize & 0x3F] as char);
        } else {
            out.push('=');
        }
        out.push('=');
    }
    out
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
