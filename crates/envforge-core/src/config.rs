//! Agent roles and per-agent configuration.
//!
//! The six specialized agents differ only in configuration: identity, role
//! description, write-root, tool categories, and task timeout. All of that
//! is derived from [`AgentRole`] here; the runtime itself is role-agnostic.

use std::time::Duration;

use serde::Serialize;

// ─────────────────────────────────────────────
// Tool categories
// ─────────────────────────────────────────────

/// Coarse capability classes used to whitelist tools per agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Workspace file access.
    File,
    /// Child processes, servers, ports.
    Process,
    /// ask/tell/broadcast between agents.
    Communication,
    /// think / plan / verify_plan.
    Reasoning,
    /// finish and deliver_project.
    Control,
    /// Notes and operation history.
    Memory,
}

// ─────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────

/// The fixed set of specialized agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    User,
    Design,
    Database,
    Backend,
    Frontend,
    Task,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::User,
        AgentRole::Design,
        AgentRole::Database,
        AgentRole::Backend,
        AgentRole::Frontend,
        AgentRole::Task,
    ];

    /// Stable short id. Also the bus address and workspace permission key.
    pub fn id(self) -> &'static str {
        match self {
            AgentRole::User => "user",
            AgentRole::Design => "design",
            AgentRole::Database => "database",
            AgentRole::Backend => "backend",
            AgentRole::Frontend => "frontend",
            AgentRole::Task => "task",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AgentRole::User => "User Agent",
            AgentRole::Design => "Design Agent",
            AgentRole::Database => "Database Agent",
            AgentRole::Backend => "Backend Agent",
            AgentRole::Frontend => "Frontend Agent",
            AgentRole::Task => "Task Agent",
        }
    }

    /// One-line role description used in prompts and the peer catalogue.
    pub fn description(self) -> &'static str {
        match self {
            AgentRole::User => "Requirements refinement, application testing, and quality assurance",
            AgentRole::Design => "Project architecture, specifications, and design documents",
            AgentRole::Database => "Database schema, SQL generation, and seed data",
            AgentRole::Backend => "Backend API and server code generation",
            AgentRole::Frontend => "Frontend UI and component code generation",
            AgentRole::Task => "Benchmark task, trajectory, and judge generation",
        }
    }

    /// The workspace subdirectory this agent may write, if any.
    pub fn write_root(self) -> Option<&'static str> {
        match self {
            AgentRole::User => None,
            AgentRole::Design => Some("design"),
            AgentRole::Database => Some("app/database"),
            AgentRole::Backend => Some("app/backend"),
            AgentRole::Frontend => Some("app/frontend"),
            AgentRole::Task => Some("tasks"),
        }
    }

    /// Wall-clock budget for one dispatched task. The User agent gets the
    /// longest because it coordinates the whole project.
    pub fn task_timeout(self) -> Duration {
        let secs = match self {
            AgentRole::User => 7200,
            AgentRole::Design => 3600,
            AgentRole::Database => 1800,
            AgentRole::Backend => 3600,
            AgentRole::Frontend => 3600,
            AgentRole::Task => 3600,
        };
        Duration::from_secs(secs)
    }

    /// Tool categories this agent may use.
    pub fn allowed_categories(self) -> &'static [ToolCategory] {
        use ToolCategory::*;
        match self {
            AgentRole::User => &[File, Process, Communication, Reasoning, Control, Memory],
            AgentRole::Backend => &[File, Process, Communication, Reasoning, Control, Memory],
            AgentRole::Frontend => &[File, Process, Communication, Reasoning, Control, Memory],
            AgentRole::Design => &[File, Communication, Reasoning, Control, Memory],
            AgentRole::Database => &[File, Communication, Reasoning, Control, Memory],
            AgentRole::Task => &[File, Communication, Reasoning, Control, Memory],
        }
    }
}

// ─────────────────────────────────────────────
// Execution configuration
// ─────────────────────────────────────────────

/// Per-agent execution limits.
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub task_timeout: Duration,
    /// Retries for transient LLM failures before surfacing the error.
    pub max_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            task_timeout: Duration::from_secs(1800),
            max_retries: 2,
        }
    }
}

/// Everything constant about one agent, assembled by the orchestrator.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub agent_id: String,
    pub agent_name: String,
    pub execution: ExecutionConfig,
    pub allowed_categories: Vec<ToolCategory>,
}

impl AgentConfig {
    pub fn for_role(role: AgentRole) -> Self {
        AgentConfig {
            agent_id: role.id().to_string(),
            agent_name: role.display_name().to_string(),
            execution: ExecutionConfig {
                task_timeout: role.task_timeout(),
                max_retries: 2,
            },
            allowed_categories: role.allowed_categories().to_vec(),
        }
    }
}
