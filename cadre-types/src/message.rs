use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    Assistant,
    User,
    Tool,
}

/// A tool invocation parsed out of an LLM response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "part_type", content = "data")]
pub enum Part {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResponse),
}

/// One chat message in the LLM-bound conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<Part>,
    /// Marks a prompt-caching anchor for providers that support it.
    #[serde(default)]
    pub cache_marker: bool,
}

impl Message {
    pub fn new(role: MessageRole) -> Self {
        Self {
            role,
            parts: Vec::new(),
            cache_marker: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![Part::Text(text.into())],
            cache_marker: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![Part::Text(text.into())],
            cache_marker: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: vec![Part::Text(text.into())],
            cache_marker: false,
        }
    }

    pub fn tool_response(tool_call_id: String, tool_name: String, result: Value) -> Self {
        Self {
            role: MessageRole::Tool,
            parts: vec![Part::ToolResult(ToolResponse {
                tool_call_id,
                tool_name,
                result,
            })],
            cache_marker: false,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        let texts: Vec<_> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n\n"))
        }
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_responses(&self) -> Vec<ToolResponse> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolResult(response) => Some(response.clone()),
                _ => None,
            })
            .collect()
    }

    /// Append text, separating from any existing text with a blank line.
    pub fn append_text(&mut self, text: &str) {
        for part in self.parts.iter_mut() {
            if let Part::Text(existing) = part {
                existing.push_str("\n\n");
                existing.push_str(text);
                return;
            }
        }
        self.parts.push(Part::Text(text.to_string()));
    }
}
