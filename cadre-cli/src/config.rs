use std::env;
use std::path::Path;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use cadre_types::{AgentConfig, FunctionHubConfig, LlmConfig};

/// Top-level CLI configuration, loaded from a TOML file with
/// `{{ENV_VAR}}` placeholders expanded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CadreConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub functionhub: Option<FunctionHubConfig>,
    pub max_iterations: u64,
    pub max_budget_per_task: Option<f64>,
    pub confirmation_mode: bool,
}

impl Default for CadreConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            functionhub: None,
            max_iterations: 50,
            max_budget_per_task: None,
            confirmation_mode: false,
        }
    }
}

pub fn load_config(path: &Path) -> Result<CadreConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(CadreConfig::default());
    }
    let config_str = std::fs::read_to_string(path)?;
    let config_str = replace_env_vars(&config_str);
    let config: CadreConfig = toml::from_str(&config_str)?;
    tracing::debug!("config: {config:?}");
    Ok(config)
}

/// Expand `{{ENV_VAR}}` placeholders; unset variables are left as-is so
/// the TOML error points at the unresolved placeholder.
fn replace_env_vars(content: &str) -> String {
    let placeholder = regex::Regex::new(r"\{\{(\w+)\}\}").unwrap();
    placeholder
        .replace_all(content, |caps: &regex::Captures<'_>| {
            env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

pub fn config_schema(pretty: bool) -> Result<String> {
    let schema = schemars::schema_for!(CadreConfig);
    let rendered = if pretty {
        serde_json::to_string_pretty(&schema)?
    } else {
        serde_json::to_string(&schema)?
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_placeholders_are_expanded() {
        env::set_var("CADRE_TEST_KEY", "sk-test");
        let raw = "[llm]\napi_key = \"{{CADRE_TEST_KEY}}\"\n";
        let expanded = replace_env_vars(raw);
        assert!(expanded.contains("sk-test"));
        let config: CadreConfig = toml::from_str(&expanded).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let config = load_config(Path::new("/nonexistent/cadre.toml")).unwrap();
        assert_eq!(config.max_iterations, 50);
        assert!(!config.confirmation_mode);
    }
}
