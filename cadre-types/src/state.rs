use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::{ActionKind, Event, EventSource};
use crate::plan::Plan;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Loading,
    Running,
    Paused,
    AwaitingUserInput,
    AwaitingUserConfirmation,
    UserConfirmed,
    UserRejected,
    Finished,
    Rejected,
    Error,
    Stopped,
    RateLimited,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentState::Finished
                | AgentState::Rejected
                | AgentState::Error
                | AgentState::Stopped
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrafficControlState {
    #[default]
    Normal,
    Throttling,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub response_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Metrics {
    pub accumulated_cost: f64,
    pub token_usages: Vec<TokenUsage>,
}

impl Metrics {
    pub fn add_token_usage(&mut self, usage: TokenUsage) {
        self.token_usages.push(usage);
    }

    pub fn add_cost(&mut self, cost: f64) {
        self.accumulated_cost += cost;
    }

    pub fn latest_usage(&self) -> Option<&TokenUsage> {
        self.token_usages.last()
    }

    pub fn merge(&mut self, other: &Metrics) {
        self.accumulated_cost += other.accumulated_cost;
        self.token_usages.extend(other.token_usages.iter().cloned());
    }
}

/// Session-level state bag owned by exactly one controller.
///
/// `history` is the filtered projection of the event stream between
/// `start_id` and `end_id`; `truncation_id` marks the first kept event
/// after a context-overflow halving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub session_id: String,
    pub iteration: u64,
    pub local_iteration: u64,
    pub max_iterations: u64,
    pub confirmation_mode: bool,
    pub agent_state: AgentState,
    pub traffic_control_state: TrafficControlState,
    pub plans: HashMap<String, Plan>,
    pub active_plan_id: Option<String>,
    pub current_task_index: usize,
    #[serde(skip)]
    pub history: Vec<Event>,
    pub start_id: i64,
    pub end_id: Option<i64>,
    pub truncation_id: Option<i64>,
    pub delegate_level: u32,
    pub metrics: Metrics,
    pub local_metrics: Metrics,
    pub outputs: Value,
    pub extra_data: HashMap<String, Value>,
}

impl State {
    pub fn new(session_id: impl Into<String>, max_iterations: u64, confirmation_mode: bool) -> Self {
        Self {
            session_id: session_id.into(),
            iteration: 0,
            local_iteration: 0,
            max_iterations,
            confirmation_mode,
            agent_state: AgentState::Loading,
            traffic_control_state: TrafficControlState::Normal,
            plans: HashMap::new(),
            active_plan_id: None,
            current_task_index: 0,
            history: Vec::new(),
            start_id: 0,
            end_id: None,
            truncation_id: None,
            delegate_level: 0,
            metrics: Metrics::default(),
            local_metrics: Metrics::default(),
            outputs: Value::Null,
            extra_data: HashMap::new(),
        }
    }

    pub fn active_plan(&self) -> Option<&Plan> {
        self.active_plan_id
            .as_ref()
            .and_then(|id| self.plans.get(id))
    }

    pub fn active_plan_mut(&mut self) -> Option<&mut Plan> {
        let id = self.active_plan_id.clone()?;
        self.plans.get_mut(&id)
    }

    pub fn get_last_user_message(&self) -> Option<&Event> {
        self.history
            .iter()
            .rev()
            .find(|e| e.is_message_from(EventSource::User))
    }

    pub fn get_last_agent_message(&self) -> Option<&Event> {
        self.history
            .iter()
            .rev()
            .find(|e| e.is_message_from(EventSource::Agent))
    }

    pub fn get_first_user_message(&self) -> Option<&Event> {
        self.history
            .iter()
            .find(|e| e.is_message_from(EventSource::User))
    }

    /// The most recent user request, used to seed tool lookups.
    pub fn get_current_user_intent(&self) -> Option<String> {
        self.get_last_user_message()
            .and_then(|e| e.message_content())
            .map(|s| s.to_string())
    }

    /// True if the most recent agent message asked the user something.
    pub fn is_awaiting_response(&self) -> bool {
        self.get_last_agent_message()
            .and_then(|e| e.as_action())
            .map(|a| {
                matches!(
                    a.kind,
                    ActionKind::Message {
                        wait_for_response: true,
                        ..
                    }
                )
            })
            .unwrap_or(false)
    }

    /// Metadata attached to outbound LLM requests for traceability.
    pub fn to_llm_metadata(&self, agent_name: &str) -> Value {
        json!({
            "agent_name": agent_name,
            "session_id": self.session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_merge_accumulates() {
        let mut a = Metrics::default();
        a.add_cost(0.5);
        a.add_token_usage(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            response_id: "r1".into(),
        });
        let mut b = Metrics::default();
        b.add_cost(0.25);
        b.add_token_usage(TokenUsage {
            prompt_tokens: 7,
            completion_tokens: 3,
            response_id: "r2".into(),
        });
        a.merge(&b);
        assert!((a.accumulated_cost - 0.75).abs() < f64::EPSILON);
        assert_eq!(a.token_usages.len(), 2);
        assert_eq!(a.latest_usage().unwrap().response_id, "r2");
    }
}
