//! Role presets — what each specialized agent gets.
//!
//! Specialization is configuration, not subclassing: a role picks its tool
//! set (filtered by the category whitelist) and contributes its sections of
//! the system prompt. The runtime itself is role-agnostic.

use std::sync::Arc;
use std::time::Duration;

use envforge_core::config::AgentRole;
use envforge_core::context::GenerationContext;
use envforge_core::ports::PortAllocator;
use envforge_core::process::ProcessManager;
use envforge_core::workspace::WorkspaceManager;

use crate::comms::{Comms, PeerInfo};
use crate::memory::AgentMemory;
use crate::runtime::AgentState;
use crate::tools::comms::{AskAgentTool, BroadcastTool, ListAgentsTool, TellAgentTool};
use crate::tools::control::{DeliverProjectTool, FinishTool, PlanTool, ThinkTool, VerifyPlanTool};
use crate::tools::file::{EditFileTool, ListFilesTool, ReadFileTool, WriteFileTool};
use crate::tools::memory::{OperationHistoryTool, RecallTool, RememberTool};
use crate::tools::process::{
    CleanupPortTool, ExecTool, FindFreePortTool, InterruptProcessTool, ListProcessesTool,
    ProcessOutputTool, RunBackgroundTool, StopProcessTool, WaitProcessTool,
};
use crate::tools::registry::ToolRegistry;

/// Shared collaborators the tools are built over.
pub struct ToolContext {
    pub agent_id: String,
    pub workspace: Arc<WorkspaceManager>,
    pub processes: Arc<ProcessManager>,
    pub ports: Arc<PortAllocator>,
    pub comms: Arc<Comms>,
    pub memory: Arc<AgentMemory>,
    pub state: Arc<AgentState>,
    pub exec_timeout: Duration,
}

/// Build the tool registry for one role. Only tools whose category the role
/// whitelists are registered; `deliver_project` is additionally restricted
/// to the User agent.
pub fn build_registry(role: AgentRole, ctx: &ToolContext) -> ToolRegistry {
    let allowed = role.allowed_categories();
    let mut registry = ToolRegistry::new();

    // File
    registry.register_if_allowed(
        Arc::new(ReadFileTool::new(ctx.workspace.clone(), ctx.agent_id.clone())),
        allowed,
    );
    registry.register_if_allowed(
        Arc::new(WriteFileTool::new(ctx.workspace.clone(), ctx.agent_id.clone())),
        allowed,
    );
    registry.register_if_allowed(
        Arc::new(EditFileTool::new(ctx.workspace.clone(), ctx.agent_id.clone())),
        allowed,
    );
    registry.register_if_allowed(
        Arc::new(ListFilesTool::new(ctx.workspace.clone(), ctx.agent_id.clone())),
        allowed,
    );

    // Process
    let workspace_root = ctx.workspace.root_dir().to_path_buf();
    registry.register_if_allowed(
        Arc::new(ExecTool::new(
            ctx.processes.clone(),
            workspace_root.clone(),
            Some(ctx.exec_timeout),
        )),
        allowed,
    );
    registry.register_if_allowed(
        Arc::new(RunBackgroundTool::new(ctx.processes.clone(), workspace_root)),
        allowed,
    );
    registry.register_if_allowed(Arc::new(StopProcessTool::new(ctx.processes.clone())), allowed);
    registry.register_if_allowed(
        Arc::new(InterruptProcessTool::new(ctx.processes.clone())),
        allowed,
    );
    registry.register_if_allowed(Arc::new(ListProcessesTool::new(ctx.processes.clone())), allowed);
    registry.register_if_allowed(Arc::new(ProcessOutputTool::new(ctx.processes.clone())), allowed);
    registry.register_if_allowed(Arc::new(WaitProcessTool::new(ctx.processes.clone())), allowed);
    registry.register_if_allowed(Arc::new(FindFreePortTool::new(ctx.ports.clone())), allowed);
    registry.register_if_allowed(Arc::new(CleanupPortTool::new(ctx.processes.clone())), allowed);

    // Communication
    registry.register_if_allowed(Arc::new(AskAgentTool::new(ctx.comms.clone())), allowed);
    registry.register_if_allowed(Arc::new(TellAgentTool::new(ctx.comms.clone())), allowed);
    registry.register_if_allowed(Arc::new(BroadcastTool::new(ctx.comms.clone())), allowed);
    registry.register_if_allowed(Arc::new(ListAgentsTool::new(ctx.comms.clone())), allowed);

    // Reasoning
    registry.register_if_allowed(Arc::new(ThinkTool::new(ctx.memory.clone())), allowed);
    registry.register_if_allowed(Arc::new(PlanTool::new(ctx.state.clone())), allowed);
    registry.register_if_allowed(Arc::new(VerifyPlanTool::new(ctx.state.clone())), allowed);

    // Control — deliver_project exists only on the User agent
    registry.register_if_allowed(Arc::new(FinishTool::new(ctx.state.clone())), allowed);
    if role == AgentRole::User {
        registry.register_if_allowed(Arc::new(DeliverProjectTool::new(ctx.state.clone())), allowed);
    }

    // Memory
    registry.register_if_allowed(Arc::new(RememberTool::new(ctx.memory.clone())), allowed);
    registry.register_if_allowed(Arc::new(RecallTool::new(ctx.memory.clone())), allowed);
    registry.register_if_allowed(
        Arc::new(OperationHistoryTool::new(ctx.memory.clone())),
        allowed,
    );

    registry
}

// ─────────────────────────────────────────────
// Prompt sections
// ─────────────────────────────────────────────

/// The communication section of the system prompt: tool table plus the
/// current peer catalogue.
pub fn communication_prompt(peers: &[PeerInfo]) -> String {
    if peers.is_empty() {
        return "You are working alone; no other agents are available.".to_string();
    }

    let mut lines = vec![
        "## Multi-Agent Communication".to_string(),
        String::new(),
        "You are part of a multi-agent team. Communicate with TOOLS:".to_string(),
        String::new(),
        "| Tool | Usage |".to_string(),
        "|------|-------|".to_string(),
        "| `ask_agent` | Ask a question and wait for the answer |".to_string(),
        "| `tell_agent` | Send a one-way notification |".to_string(),
        "| `broadcast` | Notify every other agent |".to_string(),
        "| `list_agents` | List available agents |".to_string(),
        String::new(),
        "### Available Agents".to_string(),
        String::new(),
        "| Agent ID | Role |".to_string(),
        "|----------|------|".to_string(),
    ];
    for peer in peers {
        lines.push(format!("| `{}` | {} |", peer.id, peer.role));
    }
    lines.push(String::new());
    lines.push(
        "Actually call these tools when you need another agent — do not just think about \
         communicating."
            .to_string(),
    );
    lines.join("\n")
}

/// Full system prompt for a role: identity, ports, workspace rules, peers,
/// and the working protocol.
pub fn system_prompt(
    role: AgentRole,
    context: &GenerationContext,
    peers: &[PeerInfo],
    write_root: Option<&str>,
) -> String {
    let write_rule = match write_root {
        Some(root) => format!(
            "You may write files only under `{root}/`. You can read everything."
        ),
        None => "You have read-only file access; drive other agents to produce files.".to_string(),
    };

    format!(
        "You are {name} (`{id}`), a specialized agent generating the web application \
         \"{project}\".\n\
         Your role: {description}\n\n\
         ## Service Ports\n\
         {ports}\n\n\
         ## Workspace\n\
         {write_rule}\n\n\
         {communication}\n\n\
         ## Working Protocol\n\
         1. Record a plan with the `plan` tool.\n\
         2. Do the work with your tools.\n\
         3. Call `verify_plan` once every step is complete.\n\
         4. Call `finish` to end the task.",
        name = role.display_name(),
        id = role.id(),
        project = context.name,
        description = role.description(),
        ports = context.ports_summary(),
        communication = communication_prompt(peers),
    )
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use envforge_core::bus::MessageBus;
    use envforge_core::context::{PreflightReport, ServicePorts};

    fn make_context(role: AgentRole) -> (ToolContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Arc::new(WorkspaceManager::for_generation(dir.path()).unwrap());
        let bus = Arc::new(MessageBus::new(16));
        let ctx = ToolContext {
            agent_id: role.id().to_string(),
            workspace,
            processes: Arc::new(ProcessManager::new()),
            ports: Arc::new(PortAllocator::new()),
            comms: Arc::new(Comms::new(role.id(), bus)),
            memory: Arc::new(AgentMemory::new()),
            state: Arc::new(AgentState::new()),
            exec_timeout: Duration::from_secs(60),
        };
        (ctx, dir)
    }

    #[test]
    fn test_user_gets_deliver_project() {
        let (ctx, _dir) = make_context(AgentRole::User);
        let registry = build_registry(AgentRole::User, &ctx);
        assert!(registry.has("deliver_project"));
        assert!(registry.has("exec"));
        assert!(registry.has("finish"));
    }

    #[test]
    fn test_non_user_roles_lack_deliver_project() {
        for role in AgentRole::ALL {
            if role == AgentRole::User {
                continue;
            }
            let (ctx, _dir) = make_context(role);
            let registry = build_registry(role, &ctx);
            assert!(!registry.has("deliver_project"), "{role:?} must not deliver");
            assert!(registry.has("finish"));
        }
    }

    #[test]
    fn test_design_has_no_process_tools() {
        let (ctx, _dir) = make_context(AgentRole::Design);
        let registry = build_registry(AgentRole::Design, &ctx);
        assert!(!registry.has("exec"));
        assert!(!registry.has("run_background"));
        assert!(registry.has("write_file"));
        assert!(registry.has("ask_agent"));
    }

    #[test]
    fn test_backend_has_process_tools() {
        let (ctx, _dir) = make_context(AgentRole::Backend);
        let registry = build_registry(AgentRole::Backend, &ctx);
        assert!(registry.has("exec"));
        assert!(registry.has("run_background"));
        assert!(registry.has("wait_process"));
    }

    #[test]
    fn test_communication_prompt_lists_peers() {
        let peers = vec![
            PeerInfo {
                id: "design".into(),
                name: "Design Agent".into(),
                role: "architecture".into(),
            },
            PeerInfo {
                id: "backend".into(),
                name: "Backend Agent".into(),
                role: "API code".into(),
            },
        ];
        let prompt = communication_prompt(&peers);
        assert!(prompt.contains("`design`"));
        assert!(prompt.contains("`backend`"));
        assert!(prompt.contains("ask_agent"));
    }

    #[test]
    fn test_communication_prompt_alone() {
        let prompt = communication_prompt(&[]);
        assert!(prompt.contains("working alone"));
    }

    #[test]
    fn test_system_prompt_contents() {
        let context = GenerationContext::new(
            "shop",
            ServicePorts {
                api: 3000,
                ui: 8080,
                db: 5432,
                backend_internal: 8081,
            },
            PreflightReport::default(),
        );
        let prompt = system_prompt(AgentRole::Backend, &context, &[], Some("app/backend"));
        assert!(prompt.contains("Backend Agent"));
        assert!(prompt.contains("shop"));
        assert!(prompt.contains("localhost:3000"));
        assert!(prompt.contains("`app/backend/`"));
        assert!(prompt.contains("verify_plan"));
    }

    #[test]
    fn test_system_prompt_read_only_role() {
        let context = GenerationContext::new(
            "shop",
            ServicePorts {
                api: 3000,
                ui: 8080,
                db: 5432,
                backend_internal: 8081,
            },
            PreflightReport::default(),
        );
        let prompt = system_prompt(AgentRole::User, &context, &[], None);
        assert!(prompt.contains("read-only"));
    }
}
