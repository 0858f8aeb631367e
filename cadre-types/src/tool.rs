use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AgentError;

/// A tool declared to the LLM for function calling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

impl From<ToolDefinition> for async_openai::types::chat::ChatCompletionTools {
    fn from(definition: ToolDefinition) -> Self {
        async_openai::types::chat::ChatCompletionTools::Function(
            async_openai::types::chat::ChatCompletionTool {
                function: async_openai::types::chat::FunctionObject {
                    name: definition.name,
                    description: Some(definition.description),
                    parameters: Some(definition.parameters),
                    strict: None,
                },
            },
        )
    }
}

/// A tool descriptor returned by the Function Hub; `external_id` routes
/// execution back to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubTool {
    pub definition: ToolDefinition,
    pub external_id: String,
}

/// Validate tool-call arguments against the tool's declared JSON schema.
///
/// Missing `type`/`required` keys are filled in so partial schemas still
/// validate as objects, mirroring how providers treat them.
pub fn validate_parameters(schema: &Value, params: &Value) -> Result<(), AgentError> {
    if schema.is_null() {
        return Ok(());
    }

    let mut schema = schema.clone();
    let obj = schema
        .as_object_mut()
        .ok_or_else(|| AgentError::FunctionCallValidation("parameters must be an object".into()))?;
    if !obj.contains_key("type") {
        obj.insert("type".to_string(), json!("object"));
    }
    if !obj.contains_key("required") {
        obj.insert("required".to_string(), json!([]));
    }

    let validator = jsonschema_validator(&schema)?;
    validator
        .validate(params)
        .map_err(|e| AgentError::FunctionCallValidation(e.to_string()))?;
    Ok(())
}

fn jsonschema_validator(schema: &Value) -> Result<jsonschema::Validator, AgentError> {
    jsonschema::validator_for(schema)
        .map_err(|e| AgentError::FunctionCallValidation(format!("invalid tool schema: {}", e)))
}
