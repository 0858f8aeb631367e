use std::collections::HashMap;

use serde_json::{json, Value};

use cadre_types::{
    truncate_content, ActionKind, AgentConfig, Event, EventPayload, EventSource, Message,
    MessageRole, ObservationKind, Part, ToolCall,
};

use crate::prompts::PromptManager;

/// Builds the LLM-bound message list from filtered event history.
///
/// Tool-calling actions are held back until their observation arrives so
/// every assistant tool call is immediately followed by its tool result;
/// unmatched calls are dropped rather than sent dangling.
#[derive(Debug)]
pub struct ConversationMemory {
    config: AgentConfig,
    prompts: PromptManager,
}

impl ConversationMemory {
    pub fn new(config: AgentConfig, prompts: PromptManager) -> Self {
        Self { config, prompts }
    }

    /// System message plus the optional worked-examples user message.
    pub fn initial_messages(&self, with_caching: bool) -> Vec<Message> {
        let mut system = Message::system(self.prompts.system_prompt.clone());
        system.cache_marker = with_caching;
        let mut messages = vec![system];
        if let Some(examples) = &self.prompts.examples {
            messages.push(Message::user(examples.clone()));
        }
        messages
    }

    /// Convert events into chat messages, appended to `initial`.
    pub fn process_events(&self, history: &[Event], initial: Vec<Message>) -> Vec<Message> {
        let max_chars = self.config.max_message_chars;
        let mut messages = initial;
        // tool_call_id -> assistant message awaiting its observation
        let mut pending_tool_calls: HashMap<String, Message> = HashMap::new();

        for event in history {
            match &event.payload {
                EventPayload::Action(action) => {
                    if let Some(metadata) = &action.tool_call_metadata {
                        if action.runnable() {
                            let mut message = Message::new(MessageRole::Assistant);
                            if !action.thought.is_empty() {
                                message.parts.push(Part::Text(action.thought.clone()));
                            }
                            message.parts.push(Part::ToolCall(ToolCall {
                                tool_call_id: metadata.tool_call_id.clone(),
                                tool_name: metadata.function_name.clone(),
                                input: action_arguments(&action.kind),
                            }));
                            pending_tool_calls.insert(metadata.tool_call_id.clone(), message);
                            continue;
                        }
                    }
                    if let Some(text) = action_text(&action.kind, event.source) {
                        let role = if event.source == EventSource::User {
                            MessageRole::User
                        } else {
                            MessageRole::Assistant
                        };
                        let mut message = Message::new(role);
                        message.parts.push(Part::Text(truncate_content(&text, max_chars)));
                        push_message(&mut messages, message);
                    }
                }
                EventPayload::Observation(observation) => {
                    if matches!(
                        observation.kind,
                        ObservationKind::AgentStateChanged { .. }
                            | ObservationKind::PlanStatus { .. }
                            | ObservationKind::Null
                    ) {
                        continue;
                    }
                    let content = truncate_content(&observation.content, max_chars);
                    if let Some(metadata) = &observation.tool_call_metadata {
                        if let Some(call_message) =
                            pending_tool_calls.remove(&metadata.tool_call_id)
                        {
                            messages.push(call_message);
                            messages.push(Message::tool_response(
                                metadata.tool_call_id.clone(),
                                metadata.function_name.clone(),
                                Value::String(content),
                            ));
                            continue;
                        }
                    }
                    let mut message = Message::new(MessageRole::User);
                    message.parts.push(Part::Text(observation_text(
                        &observation.kind,
                        &content,
                    )));
                    push_message(&mut messages, message);
                }
            }
        }

        if !pending_tool_calls.is_empty() {
            tracing::debug!(
                dangling = pending_tool_calls.len(),
                "dropping tool calls without observations from prompt"
            );
        }

        messages
    }

    /// Mark the last system message and the last two user messages as
    /// prompt-cache anchors.
    pub fn apply_prompt_caching(&self, messages: &mut [Message]) {
        if let Some(system) = messages
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::System)
        {
            system.cache_marker = true;
        }
        let mut marked = 0;
        for message in messages.iter_mut().rev() {
            if message.role == MessageRole::User {
                message.cache_marker = true;
                marked += 1;
                if marked == 2 {
                    break;
                }
            }
        }
    }
}

/// Join consecutive same-role user/assistant text messages with a blank
/// line; tool-call carriers and tool results are never merged.
fn push_message(messages: &mut Vec<Message>, message: Message) {
    let mergeable = matches!(message.role, MessageRole::User | MessageRole::Assistant);
    if mergeable {
        if let Some(last) = messages.last_mut() {
            let last_plain = last
                .parts
                .iter()
                .all(|p| matches!(p, Part::Text(_)));
            if last.role == message.role && last_plain {
                if let Some(text) = message.as_text() {
                    last.append_text(&text);
                }
                return;
            }
        }
    }
    messages.push(message);
}

fn action_arguments(kind: &ActionKind) -> Value {
    match kind {
        ActionKind::CmdRun { command } => json!({ "command": command }),
        ActionKind::CodeCellRun { code } => json!({ "code": code }),
        ActionKind::FileEdit { path, content } => json!({ "path": path, "content": content }),
        ActionKind::ToolCall { arguments, .. } => arguments.clone(),
        ActionKind::Recall { query, .. } => json!({ "query": query }),
        _ => Value::Null,
    }
}

/// Text rendering for actions that appear in the prompt without a paired
/// tool result. Returns `None` for backend-only actions.
fn action_text(kind: &ActionKind, _source: EventSource) -> Option<String> {
    match kind {
        ActionKind::Message { content, .. } => Some(content.clone()),
        ActionKind::Finish { final_thought, .. } if !final_thought.is_empty() => {
            Some(final_thought.clone())
        }
        ActionKind::CreatePlan { title, .. } => Some(format!("Created plan: {}", title)),
        ActionKind::MarkTask {
            task_index,
            task_status,
            task_content,
            ..
        } => Some(format!(
            "Marked task {} as {}: {}",
            task_index, task_status, task_content
        )),
        ActionKind::AssignTask {
            task_index,
            task_content,
            delegate_id,
            ..
        } => Some(format!(
            "Assigned task {} to {}: {}",
            task_index, delegate_id, task_content
        )),
        ActionKind::CmdRun { command } => Some(format!("Running command: {}", command)),
        ActionKind::CodeCellRun { code } => Some(format!("Running code:\n{}", code)),
        ActionKind::FileEdit { path, .. } => Some(format!("Editing file: {}", path)),
        _ => None,
    }
}

fn observation_text(kind: &ObservationKind, content: &str) -> String {
    match kind {
        ObservationKind::CmdOutput { exit_code } => format!(
            "Observed result of command (exit code {}):\n{}",
            exit_code, content
        ),
        ObservationKind::Error => format!("Error:\n{}", content),
        ObservationKind::Condensation => content.to_string(),
        _ => format!("Observation:\n{}", content),
    }
}
