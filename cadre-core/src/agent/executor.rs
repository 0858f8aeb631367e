use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use cadre_types::{Action, ActionKind, AgentConfig, AgentError, Metrics, State};

use crate::agent::{extract_current_step, extract_plan_state, Agent};
use crate::hub::FunctionHubClient;
use crate::llm::LlmClient;
use crate::memory::{condenser_from_config, Condenser, ConversationMemory};
use crate::prompts::PromptManager;
use crate::tools::{builtin_tools, merge_tools, response_to_actions};

/// Per-task, tool-calling agent. Each step assembles messages from the
/// filtered history, augments the built-in tools with Function Hub
/// results, invokes the LLM and converts the response into a queue of
/// pending actions that subsequent steps drain.
#[derive(Debug)]
pub struct ExecutorAgent {
    name: String,
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    hub: Option<FunctionHubClient>,
    memory: ConversationMemory,
    condenser: Box<dyn Condenser>,
    pending_actions: Mutex<VecDeque<Action>>,
}

impl ExecutorAgent {
    pub fn new(
        name: impl Into<String>,
        config: AgentConfig,
        llm: Arc<dyn LlmClient>,
        hub: Option<FunctionHubClient>,
        prompts: PromptManager,
    ) -> Self {
        let memory = ConversationMemory::new(config.clone(), prompts);
        let condenser = condenser_from_config(&config.condenser);
        Self {
            name: name.into(),
            config,
            llm,
            hub,
            memory,
            condenser,
            pending_actions: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait::async_trait]
impl Agent for ExecutorAgent {
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

        // Escape hatch: the user asked to stop.
        if state
            .get_last_user_message()
            .and_then(|e| e.message_content())
            .map(|c| c.trim() == "/exit")
            .unwrap_or(false)
        {
            return Ok(Action::new(ActionKind::Finish {
                final_thought: String::new(),
                task_completed: true,
                outputs: json!({}),
            }));
        }

        let caching = self.llm.is_caching_prompt_active();
        let condensed = self.condenser.condensed_history(state);
        let mut messages = self
            .memory
            .process_events(&condensed, self.memory.initial_messages(caching));
        if caching {
            self.memory.apply_prompt_caching(&mut messages);
        }

        let plan_state = extract_plan_state(state);
        let current_step = extract_current_step(state);
        tracing::debug!(agent = %self.name, %current_step, "querying function hub for extra tools");

        let hub_tools = match &self.hub {
            Some(hub) => hub.search(&plan_state, &current_step).await,
            None => Vec::new(),
        };
        if !hub_tools.is_empty() {
            tracing::info!(
                agent = %self.name,
                count = hub_tools.len(),
                "found additional tools from function hub"
            );
        }
        let (tools, external_ids) = merge_tools(builtin_tools(&self.config), hub_tools);

        let response = self
            .llm
            .completion(&messages, &tools, state.to_llm_metadata(&self.name))
            .await?;

        let actions = response_to_actions(&response, &tools, &external_ids)?;
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
