use std::fmt::{self, Debug, Display, Formatter};

use async_openai::error::OpenAIError;

#[derive(Debug)]
pub(crate) enum LlmClientError {
    Timeout,
    RateLimited,
    OpenAiClient(OpenAIError),
    EmptyResponse,
}

impl LlmClientError {
    /// Timeouts and rate limits are worth retrying with backoff; anything
    /// else is surfaced as-is.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, LlmClientError::Timeout | LlmClientError::RateLimited)
    }
}

impl From<OpenAIError> for LlmClientError {
    fn from(value: OpenAIError) -> Self {
        match value {
            OpenAIError::Reqwest(e) if e.is_timeout() => LlmClientError::Timeout,
            OpenAIError::ApiError(e) if e.message.to_lowercase().contains("rate limit") => {
                LlmClientError::RateLimited
            }
            e => LlmClientError::OpenAiClient(e),
        }
    }
}

impl std::error::Error for LlmClientError {}

impl Display for LlmClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LlmClientError::Timeout => write!(f, "LlmClientError: Request timed out"),
            LlmClientError::RateLimited => write!(f, "LlmClientError: Rate limited by provider"),
            LlmClientError::OpenAiClient(e) => write!(f, "LlmClientError: OpenAiClient: {e}"),
            LlmClientError::EmptyResponse => {
                write!(f, "LlmClientError: Empty response from service")
            }
        }
    }
}
