mod executor;
mod planner;

pub use executor::ExecutorAgent;
pub use planner::{PlannerAgent, DEFAULT_PLAN_STEPS};

use cadre_types::{Action, AgentConfig, AgentError, Metrics, State};

/// A stepping agent: given the current state it produces the next action.
/// Agents never mutate plan state directly; they communicate through the
/// actions they return.
#[async_trait::async_trait]
pub trait Agent: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn config(&self) -> &AgentConfig;

    async fn step(&self, state: &mut State) -> Result<Action, AgentError>;

    /// Empty any queued actions.
    async fn reset(&self);

    /// Snapshot of the agent's LLM metrics, used for budget accounting.
    fn llm_metrics(&self) -> Metrics;
}

/// Describe the overall plan position for tool lookups: explicit
/// `extra_data` wins, otherwise it is stitched from the user intent, the
/// last agent message and the active plan.
pub(crate) fn extract_plan_state(state: &State) -> String {
    if let Some(plan_state) = state
        .extra_data
        .get("plan_state")
        .and_then(|v| v.as_str())
    {
        return plan_state.to_string();
    }

    let intent = state
        .get_current_user_intent()
        .unwrap_or_else(|| "Unknown".to_string());
    let mut plan_state = format!("User intent: {}", intent);
    if let Some(last_agent) = state
        .get_last_agent_message()
        .and_then(|e| e.message_content())
    {
        let prefix: String = last_agent.chars().take(200).collect();
        plan_state.push_str(&format!("\nLast agent response: {}...", prefix));
    }
    if let Some(plan) = state.active_plan() {
        plan_state.push_str(&format!("\nTask: {}", plan.title));
    }
    plan_state
}

pub(crate) fn extract_current_step(state: &State) -> String {
    if let Some(step) = state
        .extra_data
        .get("current_step")
        .and_then(|v| v.as_str())
    {
        return step.to_string();
    }
    format!("Step {} of task", state.local_iteration)
}
