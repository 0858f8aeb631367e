pub mod config;
pub mod errors;
pub mod events;
pub mod message;
pub mod plan;
pub mod state;
pub mod tool;

pub use config::{AgentConfig, CondenserConfig, FunctionHubConfig, LlmConfig};
pub use errors::AgentError;
pub use events::{
    truncate_content, Action, ActionKind, ConfirmationStatus, Event, EventPayload, EventSource,
    Observation, ObservationKind, RecallType, ToolCallMetadata,
};
pub use message::{Message, MessageRole, Part, ToolCall, ToolResponse};
pub use plan::{Plan, PlanTask, TaskStatus};
pub use state::{AgentState, Metrics, State, TokenUsage, TrafficControlState};
pub use tool::{validate_parameters, HubTool, ToolDefinition};
