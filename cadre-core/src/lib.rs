pub mod agent;
pub mod controller;
pub mod events;
pub mod hub;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod plan;
pub mod prompts;
pub mod replay;
pub mod stuck;
pub mod tools;

pub mod types {
    pub use cadre_types::*;
}

pub use agent::{Agent, ExecutorAgent, PlannerAgent};
pub use cadre_types::AgentError;
pub use controller::{ControllerOptions, PlanController, TaskController};
pub use events::{EventHandler, EventStream, StreamSubscriber};
pub use hub::FunctionHubClient;
pub use llm::{LlmClient, LlmResponse, OpenAiClient};

#[cfg(test)]
mod tests;

#[cfg(test)]
pub use logging::init_logging;
