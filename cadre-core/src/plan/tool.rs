use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use cadre_types::{AgentError, Plan, TaskStatus, ToolDefinition};

use super::PlanStore;

pub const PLAN_TOOL_NAME: &str = "planning";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanCommand {
    Create,
    Update,
    List,
    Get,
    SetActive,
    MarkStep,
    Delete,
    AddResult,
}

/// Arguments of the single `planning` function exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanArgs {
    pub command: PlanCommand,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub steps: Option<Vec<String>>,
    #[serde(default)]
    pub step_index: Option<usize>,
    #[serde(default)]
    pub step_status: Option<TaskStatus>,
    #[serde(default)]
    pub step_notes: Option<String>,
    #[serde(default)]
    pub step_result: Option<String>,
}

impl PlanArgs {
    pub fn parse(arguments: &Value) -> Result<Self, AgentError> {
        serde_json::from_value(arguments.clone()).map_err(|e| {
            AgentError::FunctionCallValidation(format!("Invalid planning arguments: {}", e))
        })
    }
}

/// The planning tool: a single LLM-callable function dispatching on a
/// `command` field, backed by an in-memory [`PlanStore`].
#[derive(Debug, Default)]
pub struct PlanTool {
    store: Mutex<PlanStore>,
}

impl PlanTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            PLAN_TOOL_NAME,
            "The planning tool allows agents to create and manage plans to solve complex tasks.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "description": "The command to execute. The available commands are: create, update, list, get, set_active, mark_step, delete, add_result.",
                        "enum": ["create", "update", "list", "get", "set_active", "mark_step", "delete", "add_result"],
                        "type": "string"
                    },
                    "plan_id": {
                        "description": "The unique identifier for the plan. Required for commands: create, set_active, and delete. Optional for the rest (the active plan is used if not specified).",
                        "type": "string"
                    },
                    "title": {
                        "description": "The title for the plan. Required for command: create, optional for command: update.",
                        "type": "string"
                    },
                    "steps": {
                        "description": "The list of steps for the plan. Required for command: create, optional for command: update.",
                        "type": "array",
                        "items": { "type": "string" }
                    },
                    "step_index": {
                        "description": "The index of the step to update (starting from 0). Required for commands: mark_step and add_result.",
                        "type": "integer"
                    },
                    "step_status": {
                        "description": "The status to set for a step. Used with command: mark_step.",
                        "enum": ["not_started", "in_progress", "completed", "blocked"],
                        "type": "string"
                    },
                    "step_notes": {
                        "description": "Additional notes for a step. Optional for command: mark_step.",
                        "type": "string"
                    },
                    "step_result": {
                        "description": "The result of a step. Used with command: add_result.",
                        "type": "string"
                    }
                },
                "required": ["command"]
            }),
        )
    }

    pub async fn active_plan_id(&self) -> Option<String> {
        self.store.lock().await.active_plan_id().map(str::to_string)
    }

    pub async fn get_plan(&self, plan_id: &str) -> Option<Plan> {
        self.store.lock().await.get(plan_id).cloned()
    }

    pub async fn contains(&self, plan_id: &str) -> bool {
        self.store.lock().await.contains(plan_id)
    }

    pub async fn has_plans(&self) -> bool {
        !self.store.lock().await.is_empty()
    }

    /// Execute one planning command and return the textual tool output.
    pub async fn execute(&self, args: &PlanArgs) -> Result<String, AgentError> {
        let mut store = self.store.lock().await;
        match args.command {
            PlanCommand::Create => store.create(
                args.plan_id.as_deref().unwrap_or_default(),
                args.title.as_deref().unwrap_or_default(),
                args.steps.clone().unwrap_or_default(),
            ),
            PlanCommand::Update => store.update(
                args.plan_id.as_deref(),
                args.title.as_deref(),
                args.steps.clone(),
            ),
            PlanCommand::List => Ok(store.list()),
            PlanCommand::Get => store.get_rendered(args.plan_id.as_deref()),
            PlanCommand::SetActive => {
                store.set_active(args.plan_id.as_deref().unwrap_or_default())
            }
            PlanCommand::MarkStep => store.mark_step(
                args.plan_id.as_deref(),
                args.step_index.ok_or_else(|| {
                    AgentError::Planning(
                        "The `step_index` parameter is required for command: mark_step".into(),
                    )
                })?,
                args.step_status,
                args.step_notes.as_deref(),
            ),
            PlanCommand::Delete => store.delete(args.plan_id.as_deref().unwrap_or_default()),
            PlanCommand::AddResult => store.add_result(
                args.plan_id.as_deref(),
                args.step_index.ok_or_else(|| {
                    AgentError::Planning(
                        "The `step_index` parameter is required for command: add_result".into(),
                    )
                })?,
                args.step_result.as_deref().unwrap_or_default(),
            ),
        }
    }
}
