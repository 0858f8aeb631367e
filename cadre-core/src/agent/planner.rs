use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use cadre_types::{
    Action, ActionKind, AgentConfig, AgentError, Metrics, State, TaskStatus, ToolCallMetadata,
    ToolDefinition,
};

use crate::agent::Agent;
use crate::llm::{LlmClient, LlmResponse};
use crate::memory::{condenser_from_config, Condenser, ConversationMemory};
use crate::plan::{PlanArgs, PlanCommand, PlanTool, PLAN_TOOL_NAME};
use crate::prompts::PromptManager;
use crate::tools::{builtin_tools, response_to_actions, FINISH_TOOL, THINK_TOOL};

pub const DEFAULT_PLAN_STEPS: [&str; 3] =
    ["Analyze the request", "Perform tasks", "Check the result"];

/// Planning agent: same shape as the executor but its tool set is fixed
/// to the plan tool plus a small helper set, and the first step must
/// create a plan. When the LLM fails to call `planning.create`, a default
/// plan is synthesised so the session can proceed.
#[derive(Debug)]
pub struct PlannerAgent {
    name: String,
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    plan_tool: Arc<PlanTool>,
    memory: ConversationMemory,
    condenser: Box<dyn Condenser>,
    pending_actions: Mutex<VecDeque<Action>>,
}

impl PlannerAgent {
    pub fn new(
        name: impl Into<String>,
        config: AgentConfig,
        llm: Arc<dyn LlmClient>,
        prompts: PromptManager,
    ) -> Self {
        let memory = ConversationMemory::new(config.clone(), prompts);
        let condenser = condenser_from_config(&config.condenser);
        Self {
            name: name.into(),
            config,
            llm,
            plan_tool: Arc::new(PlanTool::new()),
            memory,
            condenser,
            pending_actions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn plan_tool(&self) -> Arc<PlanTool> {
        self.plan_tool.clone()
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let mut tools = vec![PlanTool::definition()];
        tools.extend(
            builtin_tools(&self.config)
                .into_iter()
                .filter(|t| t.name == FINISH_TOOL || t.name == THINK_TOOL),
        );
        tools
    }

    /// Apply one `planning` tool call against the plan tool and translate
    /// it into the action the controller reacts to.
    async fn handle_plan_call(
        &self,
        args: PlanArgs,
        metadata: ToolCallMetadata,
    ) -> Result<Action, AgentError> {
        let output = self
            .plan_tool
            .execute(&args)
            .await
            .map_err(|e| AgentError::FunctionCallValidation(e.to_string()))?;

        let action = match args.command {
            PlanCommand::Create => Action::new(ActionKind::CreatePlan {
                plan_id: args.plan_id.clone().unwrap_or_default(),
                title: args.title.clone().unwrap_or_default(),
                steps: args.steps.clone().unwrap_or_default(),
            })
            .with_metadata(metadata),
            PlanCommand::MarkStep if args.step_status.is_some() => {
                let plan_id = match args.plan_id.clone() {
                    Some(id) => id,
                    None => self.plan_tool.active_plan_id().await.unwrap_or_default(),
                };
                let task_index = args.step_index.unwrap_or_default();
                let task_content = self
                    .plan_tool
                    .get_plan(&plan_id)
                    .await
                    .and_then(|p| p.tasks.get(task_index).map(|t| t.content.clone()))
                    .unwrap_or_default();
                Action::new(ActionKind::MarkTask {
                    plan_id,
                    task_index,
                    task_content,
                    task_status: args.step_status.unwrap_or(TaskStatus::NotStarted),
                })
                .with_metadata(metadata)
            }
            // Read-only and bookkeeping commands feed their output back
            // into the conversation directly.
            _ => Action::new(ActionKind::Message {
                content: output,
                wait_for_response: false,
                displayable: true,
            })
            .with_metadata(metadata),
        };
        Ok(action)
    }

    /// Default plan published when the first planning step produced no
    /// `create` call.
    async fn synthesize_default_plan(&self, state: &State) -> Result<Action, AgentError> {
        let request = state
            .get_first_user_message()
            .and_then(|e| e.message_content())
            .unwrap_or("the user's request")
            .to_string();
        let short: String = request.chars().take(50).collect();
        let ellipsis = if request.chars().count() > 50 { "..." } else { "" };
        let title = format!("Plan for: {}{}", short, ellipsis);
        let plan_id = format!("plan_{}", Utc::now().timestamp());
        let steps: Vec<String> = DEFAULT_PLAN_STEPS.iter().map(|s| s.to_string()).collect();

        tracing::warn!(%plan_id, "planner produced no create call, creating default plan");
        self.plan_tool
            .execute(&PlanArgs {
                command: PlanCommand::Create,
                plan_id: Some(plan_id.clone()),
                title: Some(title.clone()),
                steps: Some(steps.clone()),
                step_index: None,
                step_status: None,
                step_notes: None,
                step_result: None,
            })
            .await?;

        Ok(Action::new(ActionKind::CreatePlan {
            plan_id,
            title,
            steps,
        }))
    }
}

#[async_trait::async_trait]
impl Agent for PlannerAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn step(&self, state: &mut State) -> Result<Action, AgentError> {
        if let Some(action) = self.pending_actions.lock().await.pop_front() {
            return Ok(action);
        }

        let caching = self.llm.is_caching_prompt_active();
        let condensed = self.condenser.condensed_history(state);
        let mut messages = self
            .memory
            .process_events(&condensed, self.memory.initial_messages(caching));
        if caching {
            self.memory.apply_prompt_caching(&mut messages);
        }

        let tools = self.tools();
        let response = self
            .llm
            .completion(&messages, &tools, state.to_llm_metadata(&self.name))
            .await?;

        let mut actions = Vec::new();
        let mut passthrough_calls = Vec::new();
        for call in &response.tool_calls {
            if call.tool_name == PLAN_TOOL_NAME {
                let metadata = ToolCallMetadata {
                    tool_call_id: call.tool_call_id.clone(),
                    function_name: call.tool_name.clone(),
                };
                let args = PlanArgs::parse(&call.input)?;
                actions.push(self.handle_plan_call(args, metadata).await?);
            } else {
                passthrough_calls.push(call.clone());
            }
        }

        let rest = LlmResponse {
            content: response.content.clone(),
            tool_calls: passthrough_calls,
            usage: None,
        };
        match response_to_actions(&rest, &tools, &HashMap::new()) {
            Ok(parsed) => actions.extend(parsed),
            Err(AgentError::NoAction(_)) if !actions.is_empty() => {}
            Err(e) => return Err(e),
        }

        // The first planning step must create a plan. A session may also
        // carry plans the planner never saw (replayed trajectories), so
        // both the session state and the tool store count.
        let created = actions
            .iter()
            .any(|a| matches!(a.kind, ActionKind::CreatePlan { .. }));
        if state.plans.is_empty() && !self.plan_tool.has_plans().await && !created {
            actions.insert(0, self.synthesize_default_plan(state).await?);
        }

        let mut pending = self.pending_actions.lock().await;
        pending.extend(actions);
        pending
            .pop_front()
            .ok_or_else(|| AgentError::NoAction("no actions parsed from LLM response".into()))
    }

    async fn reset(&self) {
        self.pending_actions.lock().await.clear();
    }

    fn llm_metrics(&self) -> Metrics {
        self.llm.metrics()
    }
}
