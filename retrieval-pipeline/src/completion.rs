//! Chat-completion and embedding interface consumed by the orchestrator,
//! plus its `async-openai` implementation.

use std::pin::Pin;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_stream::stream;
use async_trait::async_trait;
use common::error::AppError;
use futures::{Stream, StreamExt};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One message of the completion conversation, provider-agnostic.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Selects the output-token budget: answers need room for formatting,
/// summaries are deliberately short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Chat,
    Summary,
}

impl CompletionKind {
    const fn max_tokens(self) -> u32 {
        match self {
            Self::Chat => 1500,
            Self::Summary => 400,
        }
    }
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// Completion and embedding calls the retrieval pipeline depends on.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<PromptMessage>,
        kind: CompletionKind,
    ) -> Result<String, AppError>;

    async fn complete_stream(
        &self,
        messages: Vec<PromptMessage>,
        kind: CompletionKind,
    ) -> Result<FragmentStream, AppError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

/// `async-openai` backed implementation. Calls are bounded by the configured
/// timeout; a model rejection surfaces as a configuration error naming the
/// offending setting rather than a transient failure.
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    timeout: Duration,
}

impl OpenAiModel {
    pub fn new(
        client: Client<OpenAIConfig>,
        chat_model: String,
        embedding_model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            chat_model,
            embedding_model,
            timeout,
        }
    }

    fn build_request(
        &self,
        messages: Vec<PromptMessage>,
        kind: CompletionKind,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = messages
            .into_iter()
            .map(|message| match message.role {
                PromptRole::System => {
                    Ok(ChatCompletionRequestSystemMessage::from(message.content).into())
                }
                PromptRole::User => {
                    Ok(ChatCompletionRequestUserMessage::from(message.content).into())
                }
                PromptRole::Assistant => Ok(ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content)
                    .build()?
                    .into()),
            })
            .collect::<Result<Vec<_>, OpenAIError>>()?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(0.2)
            .max_tokens(kind.max_tokens())
            .messages(messages)
            .build()
    }

    fn map_model_error(error: OpenAIError, model: &str, setting: &str) -> AppError {
        let description = error.to_string().to_lowercase();
        if description.contains("model") || description.contains("not found") {
            AppError::Configuration(format!(
                "model '{model}' was rejected by the API; check the `{setting}` setting"
            ))
        } else {
            AppError::OpenAI(error)
        }
    }
}

#[async_trait]
impl CompletionModel for OpenAiModel {
    async fn complete(
        &self,
        messages: Vec<PromptMessage>,
        kind: CompletionKind,
    ) -> Result<String, AppError> {
        let request = self.build_request(messages, kind)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AppError::Timeout("chat completion call exceeded timeout".into()))?
            .map_err(|error| Self::map_model_error(error, &self.chat_model, "chat_model"))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn complete_stream(
        &self,
        messages: Vec<PromptMessage>,
        kind: CompletionKind,
    ) -> Result<FragmentStream, AppError> {
        let request = self.build_request(messages, kind)?;

        let mut upstream =
            tokio::time::timeout(self.timeout, self.client.chat().create_stream(request))
                .await
                .map_err(|_| AppError::Timeout("chat completion stream exceeded timeout".into()))?
                .map_err(|error| Self::map_model_error(error, &self.chat_model, "chat_model"))?;

        let fragments = stream! {
            while let Some(update) = upstream.next().await {
                match update {
                    Ok(response) => {
                        let Some(choice) = response.choices.into_iter().next() else {
                            continue;
                        };
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                yield Ok(content);
                            }
                        }
                    }
                    Err(error) => {
                        yield Err(AppError::OpenAI(error));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input([text])
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.embeddings().create(request))
            .await
            .map_err(|_| AppError::Timeout("embedding call exceeded timeout".into()))?
            .map_err(|error| {
                Self::map_model_error(error, &self.embedding_model, "embedding_model")
            })?;

        debug!(
            input_chars = text.chars().count(),
            "created question embedding"
        );

        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| AppError::LLMParsing("embedding response contained no vectors".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_rejection_maps_to_configuration_error() {
        let error = OpenAIError::InvalidArgument("The model `gpt-9` does not exist".into());
        let mapped = OpenAiModel::map_model_error(error, "gpt-9", "chat_model");
        match mapped {
            AppError::Configuration(message) => {
                assert!(message.contains("gpt-9"));
                assert!(message.contains("chat_model"));
            }
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn transient_errors_stay_openai_errors() {
        let error = OpenAIError::InvalidArgument("rate limit exceeded".into());
        let mapped = OpenAiModel::map_model_error(error, "gpt-4o-mini", "chat_model");
        assert!(matches!(mapped, AppError::OpenAI(_)));
    }

    #[test]
    fn completion_kind_selects_token_budget() {
        assert_eq!(CompletionKind::Chat.max_tokens(), 1500);
        assert_eq!(CompletionKind::Summary.max_tokens(), 400);
    }
}
