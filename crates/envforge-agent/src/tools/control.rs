//! Reasoning and termination tools: think, plan, verify_plan, finish, and
//! deliver_project.
//!
//! The guards live on [`AgentState`], not on the tools: `finish` is refused
//! until `verify_plan` has marked the plan complete, and `deliver_project`
//! is wired into the User agent only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use envforge_core::config::ToolCategory;

use crate::memory::AgentMemory;
use crate::runtime::AgentState;

use super::base::{optional_string_vec, require_string, Tool, ToolResult};

// ─────────────────────────────────────────────
// ThinkTool
// ─────────────────────────────────────────────

/// Record a reasoning step without side effects.
pub struct ThinkTool {
    memory: Arc<AgentMemory>,
}

impl ThinkTool {
    pub fn new(memory: Arc<AgentMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Write down a thought or intermediate conclusion. Has no side \
         effects; use it to reason before acting."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Reasoning
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "The thought to record"
                }
            },
            "required": ["thought"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let thought = match require_string(&params, "thought") {
            Ok(v) => v,
            Err(e) => return e,
        };
        self.memory.record_operation("think", &thought);
        ToolResult::text("Noted.")
    }
}

// ─────────────────────────────────────────────
// PlanTool
// ─────────────────────────────────────────────

/// Record the step plan for the current task.
pub struct PlanTool {
    state: Arc<AgentState>,
}

impl PlanTool {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Tool for PlanTool {
    fn name(&self) -> &str {
        "plan"
    }

    fn description(&self) -> &str {
        "Record your step-by-step plan for the current task. Call this before \
         doing the work; call verify_plan once every step is done."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Reasoning
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ordered list of plan steps"
                }
            },
            "required": ["steps"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let steps = optional_string_vec(&params, "steps");
        if steps.is_empty() {
            return ToolResult::err("A plan needs at least one step");
        }
        let count = steps.len();
        self.state.record_plan(steps);
        ToolResult::text(format!(
            "Plan recorded with {count} steps. Call verify_plan when the work is done."
        ))
    }
}

// ─────────────────────────────────────────────
// VerifyPlanTool
// ─────────────────────────────────────────────

/// Mark the recorded plan as complete, unlocking `finish`.
pub struct VerifyPlanTool {
    state: Arc<AgentState>,
}

impl VerifyPlanTool {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Tool for VerifyPlanTool {
    fn name(&self) -> &str {
        "verify_plan"
    }

    fn description(&self) -> &str {
        "Confirm that every step of your recorded plan has been completed. \
         Required before finish will succeed."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Reasoning
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _params: HashMap<String, Value>) -> ToolResult {
        if !self.state.has_plan() {
            return ToolResult::err("No plan recorded — call plan first");
        }
        self.state.mark_plan_complete();
        ToolResult::text("Plan verified. You may call finish now.")
    }
}

// ─────────────────────────────────────────────
// FinishTool
// ─────────────────────────────────────────────

/// End the current task. Refused until the plan has been verified.
pub struct FinishTool {
    state: Arc<AgentState>,
}

impl FinishTool {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        "finish"
    }

    fn description(&self) -> &str {
        "Finish the current task. Only succeeds after plan and verify_plan \
         have both been called."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Control
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "One-line summary of what was accomplished"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        if !self.state.plan_complete() {
            return ToolResult::err(
                "finish refused: the plan has not been verified — call plan, do the work, \
                 then verify_plan",
            );
        }
        self.state.mark_finished();
        let summary = params
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("task complete");
        info!(summary, "task finished");
        ToolResult::text("Task finished.")
    }
}

// ─────────────────────────────────────────────
// DeliverProjectTool
// ─────────────────────────────────────────────

/// Declare the whole project delivered. User agent only; releases the
/// orchestrator's delivery wait.
pub struct DeliverProjectTool {
    state: Arc<AgentState>,
}

impl DeliverProjectTool {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Tool for DeliverProjectTool {
    fn name(&self) -> &str {
        "deliver_project"
    }

    fn description(&self) -> &str {
        "Declare the project complete and delivered. Call only after the \
         application has been generated and tested end to end. This ends the \
         whole generation run."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Control
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "One-line summary of the delivered application"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> ToolResult {
        let summary = params
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("project delivered");
        info!(summary, "project delivered");
        self.state.mark_delivered();
        ToolResult::text("Project delivered. The run will now shut down.")
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Arc<AgentState> {
        Arc::new(AgentState::new())
    }

    #[tokio::test]
    async fn test_finish_refused_without_verified_plan() {
        let state = state();
        let finish = FinishTool::new(state.clone());

        let result = finish.execute(HashMap::new()).await;
        assert!(!result.success);
        assert!(result.render().contains("refused"));
        assert!(!state.finished());
    }

    #[tokio::test]
    async fn test_plan_verify_finish_sequence() {
        let state = state();
        let plan = PlanTool::new(state.clone());
        let verify = VerifyPlanTool::new(state.clone());
        let finish = FinishTool::new(state.clone());

        let mut params = HashMap::new();
        params.insert("steps".to_string(), json!(["write schema", "seed data"]));
        assert!(plan.execute(params).await.success);

        assert!(verify.execute(HashMap::new()).await.success);
        assert!(finish.execute(HashMap::new()).await.success);
        assert!(state.finished());
    }

    #[tokio::test]
    async fn test_verify_without_plan_refused() {
        let state = state();
        let verify = VerifyPlanTool::new(state.clone());
        let result = verify.execute(HashMap::new()).await;
        assert!(!result.success);
        assert!(!state.plan_complete());
    }

    #[tokio::test]
    async fn test_plan_needs_steps() {
        let state = state();
        let plan = PlanTool::new(state);
        let mut params = HashMap::new();
        params.insert("steps".to_string(), json!([]));
        assert!(!plan.execute(params).await.success);
    }

    #[tokio::test]
    async fn test_new_plan_resets_verification() {
        let state = state();
        let plan = PlanTool::new(state.clone());
        let verify = VerifyPlanTool::new(state.clone());

        let mut params = HashMap::new();
        params.insert("steps".to_string(), json!(["a"]));
        plan.execute(params.clone()).await;
        verify.execute(HashMap::new()).await;
        assert!(state.plan_complete());

        // Recording a fresh plan requires a fresh verification
        plan.execute(params).await;
        assert!(!state.plan_complete());
    }

    #[tokio::test]
    async fn test_deliver_project_sets_delivery() {
        let state = state();
        let deliver = DeliverProjectTool::new(state.clone());

        let mut handle = state.delivered_handle();
        assert!(!*handle.borrow());

        let result = deliver.execute(HashMap::new()).await;
        assert!(result.success);
        assert!(state.delivered());
        assert!(handle.wait_for(|v| *v).await.is_ok());
    }

    #[tokio::test]
    async fn test_think_records_operation() {
        let memory = Arc::new(AgentMemory::new());
        let think = ThinkTool::new(memory.clone());

        let mut params = HashMap::new();
        params.insert("thought".to_string(), json!("the schema needs an index"));
        let result = think.execute(params).await;
        assert!(result.success);
        assert_eq!(memory.recent_operations(1)[0].summary, "the schema needs an index");
    }
}
