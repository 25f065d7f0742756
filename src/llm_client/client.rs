use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoffBuilder};

use super::{error::LlmClientError, openai::OpenAiCompletionClient, role::ModelRole};

const RETRY_ATTEMPT_CEILING: u32 = 3;
const RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(test)]
use crate::test_data::ScriptedClient;

pub(crate) trait CompletionBackend {
    async fn get_response(&self, prompt: &str, max_tokens: u16) -> Result<String, LlmClientError>;
}

pub(crate) enum CompletionClientImpl {
    OpenAi(OpenAiCompletionClient),
    #[cfg(test)]
    Scripted(ScriptedClient),
}

impl CompletionBackend for CompletionClientImpl {
    async fn get_response(&self, prompt: &str, max_tokens: u16) -> Result<String, LlmClientError> {
        match self {
            CompletionClientImpl::OpenAi(c) => c.get_response(prompt, max_tokens).await,
            #[cfg(test)]
            CompletionClientImpl::Scripted(c) => c.get_response(prompt, max_tokens).await,
        }
    }
}

/// The single seam every model-dependent component goes through. Holds one
/// backend per role; the teacher backend is typically a stronger, slower
/// model than the student executing the classification prompts.
pub(crate) struct InferenceGateway {
    teacher: CompletionClientImpl,
    student: CompletionClientImpl,
}

impl InferenceGateway {
    pub(crate) fn new(teacher: CompletionClientImpl, student: CompletionClientImpl) -> Self {
        Self { teacher, student }
    }

    pub(crate) async fn complete(
        &self,
        prompt: &str,
        role: ModelRole,
        max_tokens: u16,
    ) -> Result<String, LlmClientError> {
        let response = match role {
            ModelRole::Teacher => self.teacher.get_response(prompt, max_tokens).await?,
            ModelRole::Student => self.student.get_response(prompt, max_tokens).await?,
        };
        if response.trim().is_empty() {
            Err(LlmClientError::EmptyResponse)
        } else {
            Ok(response)
        }
    }

    /// `complete` with exponential backoff on transient failures (timeouts,
    /// rate limits), up to a fixed attempt ceiling. Non-transient errors and
    /// the final transient error are surfaced to the caller.
    pub(crate) async fn complete_with_retry(
        &self,
        prompt: &str,
        role: ModelRole,
        max_tokens: u16,
    ) -> Result<String, LlmClientError> {
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(RETRY_INITIAL_INTERVAL)
            .with_max_elapsed_time(None)
            .build();
        let mut attempt = 1u32;
        loop {
            match self.complete(prompt, role, max_tokens).await {
                Err(e) if e.is_transient() && attempt < RETRY_ATTEMPT_CEILING => {
                    let delay = schedule
                        .next_backoff()
                        .unwrap_or(RETRY_INITIAL_INTERVAL);
                    log::warn!("{role} completion attempt {attempt} failed ({e}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => break other,
            }
        }
    }
}
