#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Malformed action: {0}")]
    MalformedAction(String),
    #[error("No action was returned: {0}")]
    NoAction(String),
    #[error("LLM response error: {0}")]
    Response(String),
    #[error("Function call validation failed: {0}")]
    FunctionCallValidation(String),
    #[error("Function call does not exist: {0}")]
    FunctionCallNotExists(String),
    #[error("Context window exceeded: {0}")]
    ContextWindowExceeded(String),
    #[error("Agent got stuck in a loop: {0}")]
    StuckInLoop(String),
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Rate limited: {0}")]
    RateLimit(String),
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("API connection failed: {0}")]
    ApiConnection(String),
    #[error("Internal server error: {0}")]
    InternalServer(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Planning error: {0}")]
    Planning(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Session error: {0}")]
    Session(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Other error: {0}")]
    Other(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    OpenAi(#[from] async_openai::error::OpenAIError),
}

impl AgentError {
    /// Model errors the controller recovers from by publishing an error
    /// observation and letting the next step retry.
    pub fn is_recoverable_model_error(&self) -> bool {
        matches!(
            self,
            AgentError::MalformedAction(_)
                | AgentError::NoAction(_)
                | AgentError::Response(_)
                | AgentError::FunctionCallValidation(_)
                | AgentError::FunctionCallNotExists(_)
        )
    }

    /// Whether this error is (or wraps) a context-window overflow.
    ///
    /// Providers do not consistently surface a dedicated error type, so the
    /// fallback is a substring match on the error text.
    pub fn is_context_window_error(&self) -> bool {
        if matches!(self, AgentError::ContextWindowExceeded(_)) {
            return true;
        }
        if let AgentError::BadRequest(msg) | AgentError::Llm(msg) | AgentError::Response(msg) =
            self
        {
            return is_context_window_message(msg);
        }
        false
    }
}

pub fn is_context_window_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("contextwindowexceedederror")
        || lower.contains("prompt is too long")
        || lower.contains("input length and `max_tokens` exceed context limit")
}
