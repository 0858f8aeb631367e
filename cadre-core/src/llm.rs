use std::sync::Mutex;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessage,
        ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionResponse,
        FunctionCall,
    },
    Client,
};
use serde_json::Value;

use cadre_types::errors::is_context_window_message;
use cadre_types::{
    AgentError, LlmConfig, Message, MessageRole, Metrics, TokenUsage, ToolCall, ToolDefinition,
};

/// The parsed essentials of one chat completion.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

/// Named interface over the LLM provider. Implementations track their own
/// token/cost metrics so controllers can enforce budgets.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync + std::fmt::Debug {
    async fn completion(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        metadata: Value,
    ) -> Result<LlmResponse, AgentError>;

    /// Snapshot of the accumulated metrics for this client.
    fn metrics(&self) -> Metrics;

    /// Whether the provider supports prompt-caching markers.
    fn is_caching_prompt_active(&self) -> bool {
        false
    }
}

/// Chat-completions client over an OpenAI-compatible endpoint.
#[derive(Debug)]
pub struct OpenAiClient {
    config: LlmConfig,
    client: Client<OpenAIConfig>,
    metrics: Mutex<Metrics>,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        let mut api_config = OpenAIConfig::new();
        if let Some(base_url) = &config.base_url {
            api_config = api_config.with_api_base(base_url.clone());
        }
        if let Some(api_key) = &config.api_key {
            api_config = api_config.with_api_key(api_key.clone());
        }
        Self {
            config,
            client: Client::with_config(api_config),
            metrics: Mutex::new(Metrics::default()),
        }
    }

    fn build_request(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: &[ToolDefinition],
        metadata: &Value,
    ) -> CreateChatCompletionRequest {
        let tools: Vec<ChatCompletionTools> =
            tools.iter().cloned().map(Into::into).collect();
        let mut request = CreateChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
            ..Default::default()
        };
        // Session id doubles as the provider-side request identifier.
        request.safety_identifier = metadata
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        request
    }

    fn record_usage(&self, response: &CreateChatCompletionResponse) -> Option<TokenUsage> {
        let usage = response.usage.as_ref()?;
        let token_usage = TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            response_id: String::new(),
        };
        let cost = usage.prompt_tokens as f64 / 1_000_000.0 * self.config.input_cost_per_million
            + usage.completion_tokens as f64 / 1_000_000.0 * self.config.output_cost_per_million;
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.add_token_usage(token_usage.clone());
        metrics.add_cost(cost);
        Some(token_usage)
    }
}

/// Map provider messages into the chat-completions request shape.
pub fn map_messages(messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
    messages
        .iter()
        .flat_map(|m| match m.role {
            MessageRole::System => {
                let mut msg = ChatCompletionRequestSystemMessageArgs::default();
                msg.content(m.as_text().unwrap_or_default());
                vec![ChatCompletionRequestMessage::System(msg.build().unwrap())]
            }
            MessageRole::User => {
                let mut msg = ChatCompletionRequestUserMessageArgs::default();
                msg.content(m.as_text().unwrap_or_default());
                vec![ChatCompletionRequestMessage::User(msg.build().unwrap())]
            }
            MessageRole::Assistant => {
                let mut msg = ChatCompletionRequestAssistantMessageArgs::default();
                if let Some(content) = m.as_text() {
                    msg.content(content);
                }
                let tool_calls = m.tool_calls();
                if !tool_calls.is_empty() {
                    let tool_calls: Vec<ChatCompletionMessageToolCalls> = tool_calls
                        .iter()
                        .map(|tc| {
                            ChatCompletionMessageToolCalls::Function(
                                ChatCompletionMessageToolCall {
                                    id: tc.tool_call_id.clone(),
                                    function: FunctionCall {
                                        name: tc.tool_name.clone(),
                                        arguments: serde_json::to_string(&tc.input)
                                            .unwrap_or_default(),
                                    },
                                },
                            )
                        })
                        .collect();
                    msg.tool_calls(tool_calls);
                }
                vec![ChatCompletionRequestMessage::Assistant(msg.build().unwrap())]
            }
            MessageRole::Tool => m
                .tool_responses()
                .into_iter()
                .map(|response| {
                    ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                        content: ChatCompletionRequestToolMessageContent::Text(
                            match response.result {
                                Value::String(s) => s,
                                other => serde_json::to_string(&other).unwrap_or_default(),
                            },
                        ),
                        tool_call_id: response.tool_call_id,
                    })
                })
                .collect(),
        })
        .collect()
}

pub fn map_tool_call(tool_call: &ChatCompletionMessageToolCalls) -> Result<ToolCall, AgentError> {
    let (tool_call_id, tool_name, input) = match tool_call {
        ChatCompletionMessageToolCalls::Function(call) => (
            call.id.clone(),
            call.function.name.clone(),
            call.function.arguments.clone(),
        ),
        ChatCompletionMessageToolCalls::Custom(call) => (
            call.id.clone(),
            call.custom_tool.name.clone(),
            call.custom_tool.input.clone(),
        ),
    };
    let input =
        serde_json::from_str(&input).unwrap_or_else(|_| Value::String(input));
    let tool_call_id = if tool_call_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        tool_call_id
    };
    Ok(ToolCall {
        tool_call_id,
        tool_name,
        input,
    })
}

fn map_openai_error(error: OpenAIError) -> AgentError {
    let text = error.to_string();
    if is_context_window_message(&text) {
        return AgentError::ContextWindowExceeded(text);
    }
    if matches!(error, OpenAIError::Reqwest(_)) {
        return AgentError::ApiConnection(text);
    }

    let lower = text.to_lowercase();
    if lower.contains("exceededbudget") || lower.contains("insufficient_quota") {
        AgentError::BadRequest(format!("ExceededBudget: {}", text))
    } else if lower.contains("context_length_exceeded") {
        AgentError::ContextWindowExceeded(text)
    } else if lower.contains("rate limit") || lower.contains("rate_limit") {
        AgentError::RateLimit(text)
    } else if lower.contains("api key") || lower.contains("authentication") {
        AgentError::Authentication(text)
    } else if lower.contains("server had an error") || lower.contains("internal server") {
        AgentError::InternalServer(text)
    } else if lower.contains("service unavailable") || lower.contains("overloaded") {
        AgentError::ServiceUnavailable(text)
    } else {
        AgentError::Llm(text)
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn completion(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        metadata: Value,
    ) -> Result<LlmResponse, AgentError> {
        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            %metadata,
            "sending chat completion request"
        );
        let request = self.build_request(map_messages(messages), tools, &metadata);
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let usage = self.record_usage(&response);
        let choice = response
            .choices
            .first()
            .ok_or_else(|| AgentError::Response("LLM returned no choices".into()))?;
        let content = choice.message.content.clone().unwrap_or_default();
        let tool_calls = choice
            .message
            .tool_calls
            .as_ref()
            .map(|calls| calls.iter().map(map_tool_call).collect::<Result<Vec<_>, _>>())
            .unwrap_or(Ok(Vec::new()))?;

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }

    fn metrics(&self) -> Metrics {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_caching_prompt_active(&self) -> bool {
        self.config.prompt_caching
    }
}
