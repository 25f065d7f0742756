use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
    Client,
};

use super::{client::CompletionBackend, error::LlmClientError};

pub(crate) struct OpenAiCompletionClient {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl OpenAiCompletionClient {
    pub(crate) fn new(client: Client<OpenAIConfig>, model_name: String) -> Self {
        Self { client, model_name }
    }
}

impl CompletionBackend for OpenAiCompletionClient {
    async fn get_response(&self, prompt: &str, max_tokens: u16) -> Result<String, LlmClientError> {
        let mut message = ChatCompletionRequestUserMessage::default();
        message.content = ChatCompletionRequestUserMessageContent::Text(prompt.to_string());

        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(max_tokens)
            .model(&self.model_name)
            .n(1)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let response = response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmClientError::EmptyResponse)?
            .message
            .content
            .ok_or(LlmClientError::EmptyResponse)?;
        Ok(response)
    }
}
