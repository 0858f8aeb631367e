/// Prompt templates for the two agent roles.
///
/// The real templating subsystem is an external collaborator; this is the
/// minimal seam the agents need, injected explicitly instead of living in
/// a module-level singleton.
#[derive(Debug, Clone)]
pub struct PromptManager {
    pub system_prompt: String,
    /// Worked examples prepended once per session as the first user
    /// message, when present.
    pub examples: Option<String>,
}

pub const EXECUTOR_SYSTEM_PROMPT: &str = "You are an AI assistant, capable of supporting all \
user needs. You interact with the environment through tool calls: run shell commands, execute \
code cells, edit files and read the web. Work in small verifiable steps and call the `finish` \
tool once the task is done.";

pub const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant. Create a short and \
feasible plan with general tasks (usually under 5 tasks per plan). Optimize for clarity and \
efficiency. Use the `planning` tool to create and manage the plan.";

impl PromptManager {
    pub fn executor() -> Self {
        Self {
            system_prompt: EXECUTOR_SYSTEM_PROMPT.to_string(),
            examples: None,
        }
    }

    pub fn planner() -> Self {
        Self {
            system_prompt: PLANNER_SYSTEM_PROMPT.to_string(),
            examples: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_examples(mut self, examples: impl Into<String>) -> Self {
        self.examples = Some(examples.into());
        self
    }
}
