use std::collections::HashMap;

use serde_json::{json, Value};

use cadre_types::{
    validate_parameters, Action, ActionKind, AgentConfig, AgentError, HubTool, ToolCallMetadata,
    ToolDefinition,
};

use crate::llm::LlmResponse;

pub const CMD_RUN_TOOL: &str = "execute_bash";
pub const CODE_CELL_TOOL: &str = "execute_ipython_cell";
pub const FILE_EDIT_TOOL: &str = "edit_file";
pub const FINISH_TOOL: &str = "finish";
pub const THINK_TOOL: &str = "think";
pub const BROWSER_TOOL: &str = "browser";
pub const WEB_READ_TOOL: &str = "web_read";

/// Built-in tool descriptors, gated by the agent configuration.
pub fn builtin_tools(config: &AgentConfig) -> Vec<ToolDefinition> {
    let mut tools = vec![
        ToolDefinition::new(
            CMD_RUN_TOOL,
            "Execute a bash command in the sandbox terminal.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The bash command to execute."
                    }
                },
                "required": ["command"]
            }),
        ),
        ToolDefinition::new(
            FINISH_TOOL,
            "Signals the completion of the current task or conversation. \
             Use this once the user's request is fully handled, or when you \
             cannot proceed due to technical limitations or missing information.",
            json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The final message to the user."
                    },
                    "task_completed": {
                        "type": "boolean",
                        "description": "Whether you believe you have successfully completed the user's task."
                    }
                },
                "required": ["message", "task_completed"],
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            THINK_TOOL,
            "Log a thought without taking any action. Use it to reason about the next step.",
            json!({
                "type": "object",
                "properties": {
                    "thought": { "type": "string", "description": "The thought to log." }
                },
                "required": ["thought"]
            }),
        ),
        ToolDefinition::new(
            WEB_READ_TOOL,
            "Read and summarise the content of a web page.",
            json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to read." }
                },
                "required": ["url"]
            }),
        ),
    ];

    if config.enable_jupyter {
        tools.push(ToolDefinition::new(
            CODE_CELL_TOOL,
            "Run a cell of Python code in an interactive interpreter.",
            json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "The Python code to run." }
                },
                "required": ["code"]
            }),
        ));
    }
    if config.enable_llm_editor {
        tools.push(ToolDefinition::new(
            FILE_EDIT_TOOL,
            "Create or overwrite a file with the given content.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Absolute path of the file." },
                    "content": { "type": "string", "description": "The full new file content." }
                },
                "required": ["path", "content"]
            }),
        ));
    }
    if config.enable_browsing {
        tools.push(ToolDefinition::new(
            BROWSER_TOOL,
            "Interact with a browser session to navigate and inspect pages.",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "description": "The browser interaction to perform." }
                },
                "required": ["action"]
            }),
        ));
    }

    tools
}

/// Merge built-in tools with hub results. When two tools share a function
/// name the first wins; later duplicates are dropped with a warning.
/// Returns the merged list plus the name → external id routing map.
pub fn merge_tools(
    built_in: Vec<ToolDefinition>,
    hub_tools: Vec<HubTool>,
) -> (Vec<ToolDefinition>, HashMap<String, String>) {
    let mut merged: Vec<ToolDefinition> = Vec::new();
    let mut external_ids = HashMap::new();

    for tool in built_in {
        if merged.iter().any(|t| t.name == tool.name) {
            tracing::warn!(name = %tool.name, "Duplicate tool name, using the first one");
            continue;
        }
        merged.push(tool);
    }
    for hub_tool in hub_tools {
        let name = hub_tool.definition.name.clone();
        if merged.iter().any(|t| t.name == name) {
            tracing::warn!(name = %name, "Duplicate tool name, using the first one");
            continue;
        }
        external_ids.insert(name, hub_tool.external_id);
        merged.push(hub_tool.definition);
    }

    (merged, external_ids)
}

/// Convert an LLM response into the queue of actions the agent will
/// publish. Textual content becomes a leading `Message` action; each tool
/// call maps to its built-in action or a generic hub `ToolCall`.
pub fn response_to_actions(
    response: &LlmResponse,
    tools: &[ToolDefinition],
    external_ids: &HashMap<String, String>,
) -> Result<Vec<Action>, AgentError> {
    let mut actions = Vec::new();

    for call in &response.tool_calls {
        let metadata = ToolCallMetadata {
            tool_call_id: call.tool_call_id.clone(),
            function_name: call.tool_name.clone(),
        };
        let tool = tools.iter().find(|t| t.name == call.tool_name);
        if let Some(tool) = tool {
            validate_parameters(&tool.parameters, &call.input)?;
        } else if !external_ids.contains_key(&call.tool_name) {
            return Err(AgentError::FunctionCallNotExists(format!(
                "Tool '{}' is not registered for this agent",
                call.tool_name
            )));
        }

        let kind = match call.tool_name.as_str() {
            CMD_RUN_TOOL => ActionKind::CmdRun {
                command: require_str(&call.input, "command", &call.tool_name)?,
            },
            CODE_CELL_TOOL => ActionKind::CodeCellRun {
                code: require_str(&call.input, "code", &call.tool_name)?,
            },
            FILE_EDIT_TOOL => ActionKind::FileEdit {
                path: require_str(&call.input, "path", &call.tool_name)?,
                content: require_str(&call.input, "content", &call.tool_name)?,
            },
            FINISH_TOOL => ActionKind::Finish {
                final_thought: optional_str(&call.input, "message"),
                task_completed: call
                    .input
                    .get("task_completed")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                outputs: call.input.clone(),
            },
            THINK_TOOL => ActionKind::Message {
                content: require_str(&call.input, "thought", &call.tool_name)?,
                wait_for_response: false,
                displayable: true,
            },
            name => ActionKind::ToolCall {
                name: name.to_string(),
                arguments: call.input.clone(),
                external_id: external_ids.get(name).cloned(),
            },
        };
        actions.push(Action::new(kind).with_metadata(metadata));
    }

    if !response.content.is_empty() {
        let message = Action::new(ActionKind::Message {
            content: response.content.clone(),
            wait_for_response: actions.is_empty(),
            displayable: true,
        });
        actions.insert(0, message);
    }

    if actions.is_empty() {
        return Err(AgentError::NoAction(
            "LLM response contained neither content nor tool calls".into(),
        ));
    }

    Ok(actions)
}

fn require_str(input: &Value, field: &str, tool: &str) -> Result<String, AgentError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AgentError::FunctionCallValidation(format!(
                "Missing required argument `{}` for tool '{}'",
                field, tool
            ))
        })
}

fn optional_str(input: &Value, field: &str) -> String {
    input
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
