use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::TaskStatus;
use crate::state::AgentState;

/// Default per-message character budget when building LLM prompts.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 30_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    User,
    Agent,
    Environment,
}

/// Correlates an action produced by an LLM tool call with the observation
/// that answers it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallMetadata {
    pub tool_call_id: String,
    pub function_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    AwaitingConfirmation,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecallType {
    WorkspaceContext,
    Knowledge,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ActionKind {
    Message {
        content: String,
        #[serde(default)]
        wait_for_response: bool,
        #[serde(default = "default_true")]
        displayable: bool,
    },
    CmdRun {
        command: String,
    },
    CodeCellRun {
        code: String,
    },
    FileEdit {
        path: String,
        content: String,
    },
    /// Generic tool call; `external_id` is set when the tool was discovered
    /// through the Function Hub and execution routes through it.
    ToolCall {
        name: String,
        arguments: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        external_id: Option<String>,
    },
    Recall {
        query: String,
        recall_type: RecallType,
    },
    CreatePlan {
        plan_id: String,
        title: String,
        steps: Vec<String>,
    },
    MarkTask {
        plan_id: String,
        task_index: usize,
        task_content: String,
        task_status: TaskStatus,
    },
    AssignTask {
        plan_id: String,
        task_index: usize,
        task_content: String,
        delegate_id: String,
    },
    Finish {
        #[serde(default)]
        final_thought: String,
        #[serde(default = "default_true")]
        task_completed: bool,
        #[serde(default)]
        outputs: Value,
    },
    Reject {
        #[serde(default)]
        outputs: Value,
    },
    ChangeAgentState {
        agent_state: AgentState,
    },
    Null,
}

/// An intent published to the event stream. Runnable actions expect an
/// observation whose `cause` points back at the action's event id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_metadata: Option<ToolCallMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_state: Option<ConfirmationStatus>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            thought: String::new(),
            hidden: false,
            tool_call_metadata: None,
            confirmation_state: None,
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self::new(ActionKind::Message {
            content: content.into(),
            wait_for_response: false,
            displayable: true,
        })
    }

    pub fn with_metadata(mut self, metadata: ToolCallMetadata) -> Self {
        self.tool_call_metadata = Some(metadata);
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = thought.into();
        self
    }

    /// Non-runnable actions do not require an observation.
    pub fn runnable(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::CmdRun { .. }
                | ActionKind::CodeCellRun { .. }
                | ActionKind::FileEdit { .. }
                | ActionKind::ToolCall { .. }
                | ActionKind::Recall { .. }
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ActionKind::Null)
    }

    /// Short human-readable description, used for logging and display.
    pub fn describe(&self) -> String {
        match &self.kind {
            ActionKind::Message { content, .. } => content.clone(),
            ActionKind::CmdRun { command } => format!("$ {}", command),
            ActionKind::CodeCellRun { code } => format!(">>> {}", code),
            ActionKind::FileEdit { path, .. } => format!("edit {}", path),
            ActionKind::ToolCall { name, .. } => format!("tool call: {}", name),
            ActionKind::Recall { query, .. } => format!("recall: {}", query),
            ActionKind::CreatePlan { plan_id, title, .. } => {
                format!("create plan {} ({})", plan_id, title)
            }
            ActionKind::MarkTask {
                task_index,
                task_status,
                ..
            } => format!("mark task {} as {}", task_index, task_status),
            ActionKind::AssignTask {
                task_index,
                delegate_id,
                ..
            } => format!("assign task {} to {}", task_index, delegate_id),
            ActionKind::Finish { final_thought, .. } => {
                format!("finish: {}", final_thought)
            }
            ActionKind::Reject { .. } => "reject".to_string(),
            ActionKind::ChangeAgentState { agent_state } => {
                format!("change agent state to {:?}", agent_state)
            }
            ActionKind::Null => "null".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ObservationKind {
    CmdOutput {
        exit_code: i32,
    },
    FileEdit {
        path: String,
    },
    Error,
    AgentStateChanged {
        agent_state: AgentState,
    },
    PlanStatus {
        status: Value,
    },
    FunctionHub {
        function_name: String,
        external_id: String,
        #[serde(default)]
        image_urls: Vec<String>,
        #[serde(default)]
        video_urls: Vec<String>,
        #[serde(default)]
        audio_urls: Vec<String>,
        #[serde(default)]
        blob: String,
        #[serde(default)]
        error: String,
    },
    Condensation,
    Null,
}

/// The outcome of a runnable action, or an ambient environment signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    #[serde(flatten)]
    pub kind: ObservationKind,
    pub content: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_metadata: Option<ToolCallMetadata>,
}

impl Observation {
    pub fn new(kind: ObservationKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            hidden: false,
            cause: None,
            tool_call_metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ObservationKind::Error, content)
    }

    pub fn with_cause(mut self, cause: i64) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_metadata(mut self, metadata: ToolCallMetadata) -> Self {
        self.tool_call_metadata = Some(metadata);
        self
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ObservationKind::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ObservationKind::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum EventPayload {
    Action(Action),
    Observation(Observation),
}

impl From<Action> for EventPayload {
    fn from(action: Action) -> Self {
        EventPayload::Action(action)
    }
}

impl From<Observation> for EventPayload {
    fn from(observation: Observation) -> Self {
        EventPayload::Observation(observation)
    }
}

impl EventPayload {
    pub fn hidden(&self) -> bool {
        match self {
            EventPayload::Action(a) => a.hidden,
            EventPayload::Observation(o) => o.hidden,
        }
    }

    pub fn cause(&self) -> Option<i64> {
        match self {
            EventPayload::Action(_) => None,
            EventPayload::Observation(o) => o.cause,
        }
    }
}

/// Immutable record in the event stream. Ids are dense, strictly
/// increasing and assigned by the stream, never by callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: i64,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<i64>,
    #[serde(default)]
    pub hidden: bool,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn as_action(&self) -> Option<&Action> {
        match &self.payload {
            EventPayload::Action(action) => Some(action),
            EventPayload::Observation(_) => None,
        }
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match &self.payload {
            EventPayload::Action(_) => None,
            EventPayload::Observation(observation) => Some(observation),
        }
    }

    pub fn is_action(&self) -> bool {
        matches!(self.payload, EventPayload::Action(_))
    }

    pub fn is_observation(&self) -> bool {
        matches!(self.payload, EventPayload::Observation(_))
    }

    /// True for a `Message` action from the given source.
    pub fn is_message_from(&self, source: EventSource) -> bool {
        self.source == source
            && self
                .as_action()
                .map(|a| matches!(a.kind, ActionKind::Message { .. }))
                .unwrap_or(false)
    }

    pub fn message_content(&self) -> Option<&str> {
        match self.as_action()?.kind {
            ActionKind::Message { ref content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn tool_call_metadata(&self) -> Option<&ToolCallMetadata> {
        match &self.payload {
            EventPayload::Action(a) => a.tool_call_metadata.as_ref(),
            EventPayload::Observation(o) => o.tool_call_metadata.as_ref(),
        }
    }
}

/// Clip observation content to `max_chars`, keeping the head and tail
/// halves around an explicit truncation marker.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    if max_chars == 0 || content.chars().count() <= max_chars {
        return content.to_string();
    }
    let half = max_chars / 2;
    let head: String = content.chars().take(half).collect();
    let tail_start = content.chars().count() - half;
    let tail: String = content.chars().skip(tail_start).collect();
    format!(
        "{}\n[... observation truncated due to length ...]\n{}",
        head, tail
    )
}
