mod client;
mod error;
mod openai;
mod role;

pub(crate) use client::{CompletionBackend, CompletionClientImpl, InferenceGateway};
pub(crate) use error::LlmClientError;
pub(crate) use openai::OpenAiCompletionClient;
pub(crate) use role::ModelRole;
