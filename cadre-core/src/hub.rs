use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use cadre_types::{
    AgentError, FunctionHubConfig, HubTool, Observation, ObservationKind, ToolDefinition,
};

pub const DEFAULT_TOP_K_SEARCH: u32 = 20;
pub const DEFAULT_TOP_K_RERANKED: u32 = 5;
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Result kinds the hub can return from `execute-function`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Text,
    ImageUrl,
    VideoUrl,
    AudioUrl,
    Image,
    Video,
    Audio,
    Blob,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
struct HubResponseItem {
    #[serde(rename = "type", default = "default_response_type")]
    response_type: ResponseType,
    #[serde(default)]
    content: String,
    #[serde(default)]
    description: String,
}

fn default_response_type() -> ResponseType {
    ResponseType::Text
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    entity: Option<SearchEntity>,
}

#[derive(Debug, Deserialize)]
struct SearchEntity {
    #[serde(default)]
    function_id: String,
    function_metadata: Option<FunctionMetadata>,
}

#[derive(Debug, Deserialize)]
struct FunctionMetadata {
    function: Option<FunctionInfo>,
}

#[derive(Debug, Deserialize)]
struct FunctionInfo {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Value,
}

/// Remote lookup of external tools: ranks by a (semantic, rerank) query
/// pair and executes tools by id. Stateless per call; every failure
/// degrades to "no tools" so callers proceed with built-ins only.
#[derive(Debug, Clone)]
pub struct FunctionHubClient {
    config: FunctionHubConfig,
    client: reqwest::Client,
}

impl FunctionHubClient {
    pub fn new(config: FunctionHubConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// Search the hub and rerank, returning LLM-ready tool descriptors.
    /// Non-2xx responses, transport failures and timeouts all yield an
    /// empty list.
    pub async fn search_with_rerank(
        &self,
        search_query: &str,
        rerank_query: &str,
        top_k_search: u32,
        top_k_reranked: u32,
        timeout: Duration,
    ) -> Vec<HubTool> {
        let url = format!("{}/v1/functions/search-function-and-rerank", self.base_url());
        let payload = json!({
            "wallet": self.config.wallet_address,
            "search_query": search_query,
            "reranker_query": rerank_query,
            "top_k_search": top_k_search,
            "top_k_reranked": top_k_reranked,
        });

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.config.api_key)
            .json(&payload)
            .timeout(timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Function hub search failed: {}", e);
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Function hub search returned non-2xx");
            return Vec::new();
        }
        match response.json::<SearchResponse>().await {
            Ok(body) => parse_search_results(body),
            Err(e) => {
                tracing::warn!("Function hub search returned malformed body: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn search(&self, search_query: &str, rerank_query: &str) -> Vec<HubTool> {
        self.search_with_rerank(
            search_query,
            rerank_query,
            DEFAULT_TOP_K_SEARCH,
            DEFAULT_TOP_K_RERANKED,
            DEFAULT_SEARCH_TIMEOUT,
        )
        .await
    }

    /// Execute a hub tool by external id; the typed results are flattened
    /// into a single observation.
    pub async fn execute(
        &self,
        function_name: &str,
        external_id: &str,
        arguments: &Value,
    ) -> Observation {
        let url = format!("{}/v1/functions/execute-function", self.base_url());
        let payload = json!({
            "wallet": self.config.wallet_address,
            "function_id": external_id,
            "arguments": arguments,
        });

        let items = match self
            .client
            .post(&url)
            .header("X-API-KEY", &self.config.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(body) => parse_execute_results(&body),
                    Err(e) => vec![error_item(format!("Malformed hub response: {}", e))],
                }
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                vec![error_item(format!("Error {}: {}", status, text))]
            }
            Err(e) => vec![error_item(e.to_string())],
        };

        flatten_responses(function_name, external_id, items)
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }
}

fn error_item(content: String) -> HubResponseItem {
    HubResponseItem {
        response_type: ResponseType::Error,
        content,
        description: "Failed to execute function".to_string(),
    }
}

fn parse_search_results(body: SearchResponse) -> Vec<HubTool> {
    let mut tools = Vec::new();
    for result in body.results {
        let Some(entity) = result.entity else { continue };
        let Some(function) = entity.function_metadata.and_then(|m| m.function) else {
            continue;
        };
        let name = function
            .name
            .unwrap_or_else(|| format!("function_{}", entity.function_id));
        tools.push(HubTool {
            definition: ToolDefinition::new(name, function.description, function.parameters),
            external_id: entity.function_id,
        });
    }
    tools
}

fn parse_execute_results(body: &Value) -> Vec<HubResponseItem> {
    let result = body.get("result").unwrap_or(body);
    let items: Vec<Value> = match result {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<HubResponseItem>(item.clone()).unwrap_or(HubResponseItem {
                response_type: ResponseType::Text,
                content: item.to_string(),
                description: "Unknown response format".to_string(),
            })
        })
        .collect()
}

/// Aggregate the typed responses into one observation: concatenated text
/// with media markers interleaved, url lists per media kind, a single
/// opaque blob (first non-empty wins) and a concatenated error field.
fn flatten_responses(
    function_name: &str,
    external_id: &str,
    responses: Vec<HubResponseItem>,
) -> Observation {
    let mut text_contents: Vec<String> = Vec::new();
    let mut image_urls = Vec::new();
    let mut video_urls = Vec::new();
    let mut audio_urls = Vec::new();
    let mut blob = String::new();
    let mut error = String::new();

    for response in responses {
        match response.response_type {
            ResponseType::Error => {
                if !error.is_empty() {
                    error.push('\n');
                }
                error.push_str(&response.content);
            }
            ResponseType::Text => text_contents.push(response.content),
            ResponseType::ImageUrl => {
                image_urls.push(response.content);
                text_contents.push(format!(
                    "[Image: {}]",
                    non_empty(&response.description, "Generated image")
                ));
            }
            ResponseType::VideoUrl => {
                video_urls.push(response.content);
                text_contents.push(format!(
                    "[Video: {}]",
                    non_empty(&response.description, "Generated video")
                ));
            }
            ResponseType::AudioUrl => {
                audio_urls.push(response.content);
                text_contents.push(format!(
                    "[Audio: {}]",
                    non_empty(&response.description, "Generated audio")
                ));
            }
            ResponseType::Blob => {
                if blob.is_empty() {
                    blob = response.content;
                }
                text_contents.push(format!(
                    "[File: {}]",
                    non_empty(&response.description, "Generated file")
                ));
            }
            ResponseType::Image | ResponseType::Video | ResponseType::Audio => {
                let label = match response.response_type {
                    ResponseType::Image => "Image",
                    ResponseType::Video => "Video",
                    _ => "Audio",
                };
                if blob.is_empty() {
                    blob = response.content;
                }
                text_contents.push(format!(
                    "[{}: {}]",
                    label,
                    non_empty(&response.description, &format!("Generated {}", label.to_lowercase()))
                ));
            }
        }
    }

    Observation::new(
        ObservationKind::FunctionHub {
            function_name: function_name.to_string(),
            external_id: external_id.to_string(),
            image_urls,
            video_urls,
            audio_urls,
            blob,
            error,
        },
        text_contents.join("\n"),
    )
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
