use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::events::DEFAULT_MAX_MESSAGE_CHARS;

/// Connection settings for the Function Hub.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FunctionHubConfig {
    #[serde(default = "default_hub_url")]
    pub url: String,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub api_key: String,
}

fn default_hub_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for FunctionHubConfig {
    fn default() -> Self {
        Self {
            url: default_hub_url(),
            wallet_address: String::new(),
            api_key: String::new(),
        }
    }
}

impl FunctionHubConfig {
    /// The hub URL must parse to a scheme plus authority.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.url.is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "Function hub URL is required".to_string(),
            ));
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| {
            AgentError::InvalidConfiguration(format!("Invalid URL {}: {}", self.url, e))
        })?;
        if parsed.scheme().is_empty() || !parsed.has_host() {
            return Err(AgentError::InvalidConfiguration(format!(
                "Invalid URL format: {}",
                self.url
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CondenserConfig {
    /// Pass history through unchanged.
    #[default]
    Noop,
}

/// Per-agent feature switches and budgets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub enable_browsing: bool,
    pub enable_jupyter: bool,
    pub enable_llm_editor: bool,
    pub enable_history_truncation: bool,
    pub max_message_chars: usize,
    pub condenser: CondenserConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enable_browsing: true,
            enable_jupyter: true,
            enable_llm_editor: true,
            enable_history_truncation: true,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            condenser: CondenserConfig::Noop,
        }
    }
}

/// Model settings for an LLM-backed client.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// USD per million prompt tokens, used for budget accounting.
    pub input_cost_per_million: f64,
    /// USD per million completion tokens.
    pub output_cost_per_million: f64,
    pub prompt_caching: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            base_url: None,
            api_key: None,
            input_cost_per_million: 0.0,
            output_cost_per_million: 0.0,
            prompt_caching: false,
        }
    }
}
