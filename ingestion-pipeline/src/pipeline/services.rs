use std::{sync::Arc, time::Duration};

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use common::{
    error::AppError,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::utils::llm_instructions::{
    merge_questions_prompt, question_prompt, summary_prompt, topic_prompt, unify_topics_prompt,
    QUESTION_SYSTEM_MESSAGE, SUMMARY_SYSTEM_MESSAGE, TOPIC_SYSTEM_MESSAGE,
};

pub const TOPIC_FALLBACK: &str = "Misc";
pub const SUMMARY_FALLBACK: &str = "Cannot summarize";
pub const QUESTION_FALLBACK: &str = "Unquestionable";

const TOPIC_MAX_TOKENS: u32 = 20;
const SUMMARY_MAX_TOKENS: u32 = 200;
const QUESTION_MAX_TOKENS: u32 = 50;
const TOPIC_TEMPERATURE: f32 = 0.7;

/// Language-model collaborator used by the consolidation engine.
///
/// Implementations answer with a fallback value instead of failing when the provider
/// misbehaves; an `Err` is reserved for failures the engine cannot paper over.
#[async_trait]
pub trait ConsolidationServices: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, AppError>;

    /// Topic for `context`, which carries both the summary and the chunk text.
    async fn topic(&self, document: &str, context: &str) -> Result<String, AppError>;

    async fn question(&self, text: &str) -> Result<String, AppError>;

    async fn merge_questions(&self, existing: &str, candidate: &str) -> Result<String, AppError>;

    async fn unify_topics(&self, topics: &[String]) -> Result<String, AppError>;

    /// An empty vector signals that no embedding could be produced.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

struct CompletionSpec<'a> {
    system: &'a str,
    max_tokens: u32,
    temperature: Option<f32>,
    fallback: &'a str,
}

pub struct DefaultConsolidationServices {
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    chat_model: String,
    embedding_provider: Arc<EmbeddingProvider>,
    request_delay: Duration,
}

impl DefaultConsolidationServices {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: &AppConfig,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            openai_client,
            chat_model: config.chat_model.clone(),
            embedding_provider,
            request_delay: Duration::from_millis(config.request_delay_ms),
        }
    }

    async fn pace(&self) {
        if !self.request_delay.is_zero() {
            sleep(self.request_delay).await;
        }
    }

    async fn complete(&self, spec: CompletionSpec<'_>, prompt: String) -> String {
        self.pace().await;

        match self.request_completion(&spec, prompt).await {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                debug!(fallback = spec.fallback, "empty completion; using fallback");
                spec.fallback.to_string()
            }
            Err(err) => {
                warn!(error = %err, fallback = spec.fallback, "completion failed; using fallback");
                spec.fallback.to_string()
            }
        }
    }

    async fn request_completion(
        &self,
        spec: &CompletionSpec<'_>,
        prompt: String,
    ) -> Result<Option<String>, AppError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.chat_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(spec.system).into(),
                ChatCompletionRequestUserMessage::from(prompt).into(),
            ])
            .max_completion_tokens(spec.max_tokens);
        if let Some(temperature) = spec.temperature {
            args.temperature(temperature);
        }
        let request = args.build()?;

        let response = self.openai_client.chat().create(request).await?;

        Ok(response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|answer| !answer.is_empty())
            .map(str::to_string))
    }
}

#[async_trait]
impl ConsolidationServices for DefaultConsolidationServices {
    async fn summarize(&self, text: &str) -> Result<String, AppError> {
        let spec = CompletionSpec {
            system: SUMMARY_SYSTEM_MESSAGE,
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: None,
            fallback: SUMMARY_FALLBACK,
        };
        Ok(self.complete(spec, summary_prompt(text)).await)
    }

    async fn topic(&self, document: &str, context: &str) -> Result<String, AppError> {
        let spec = CompletionSpec {
            system: TOPIC_SYSTEM_MESSAGE,
            max_tokens: TOPIC_MAX_TOKENS,
            temperature: Some(TOPIC_TEMPERATURE),
            fallback: TOPIC_FALLBACK,
        };
        Ok(self.complete(spec, topic_prompt(document, context)).await)
    }

    async fn question(&self, text: &str) -> Result<String, AppError> {
        let spec = CompletionSpec {
            system: QUESTION_SYSTEM_MESSAGE,
            max_tokens: QUESTION_MAX_TOKENS,
            temperature: None,
            fallback: QUESTION_FALLBACK,
        };
        Ok(self.complete(spec, question_prompt(text)).await)
    }

    async fn merge_questions(&self, existing: &str, candidate: &str) -> Result<String, AppError> {
        let spec = CompletionSpec {
            system: QUESTION_SYSTEM_MESSAGE,
            max_tokens: QUESTION_MAX_TOKENS,
            temperature: None,
            fallback: QUESTION_FALLBACK,
        };
        Ok(self
            .complete(spec, merge_questions_prompt(existing, candidate))
            .await)
    }

    async fn unify_topics(&self, topics: &[String]) -> Result<String, AppError> {
        let spec = CompletionSpec {
            system: TOPIC_SYSTEM_MESSAGE,
            max_tokens: TOPIC_MAX_TOKENS,
            temperature: Some(TOPIC_TEMPERATURE),
            fallback: TOPIC_FALLBACK,
        };
        Ok(self.complete(spec, unify_topics_prompt(topics)).await)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.pace().await;

        match self.embedding_provider.embed(text).await {
            Ok(embedding) => Ok(embedding),
            Err(err) => {
                warn!(
                    error = %err,
                    backend = self.embedding_provider.backend_label(),
                    "embedding failed; returning an empty vector"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_services() -> DefaultConsolidationServices {
        let config = AppConfig {
            openai_api_key: "test".into(),
            openai_base_url: "http://127.0.0.1:9".into(),
            request_delay_ms: 0,
            ..Default::default()
        };
        let client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));
        DefaultConsolidationServices::new(
            client,
            &config,
            Arc::new(EmbeddingProvider::new_hashed(16)),
        )
    }

    #[tokio::test]
    async fn unreachable_provider_yields_fallbacks() {
        let services = offline_services();

        assert_eq!(
            services.summarize("text").await.expect("summary"),
            SUMMARY_FALLBACK
        );
        assert_eq!(
            services.topic("doc", "text").await.expect("topic"),
            TOPIC_FALLBACK
        );
        assert_eq!(
            services.question("text").await.expect("question"),
            QUESTION_FALLBACK
        );
    }

    #[tokio::test]
    async fn hashed_backend_embeds_offline() {
        let services = offline_services();
        let embedding = services.embed("plants need light").await.expect("embed");
        assert_eq!(embedding.len(), 16);
    }
}
