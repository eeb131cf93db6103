//! Chat-model seam shared by the LLM expander, reranker, selector and answer
//! generator.
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use citerag_core::config::LlmSettings;
use citerag_core::error::{Error, Result};

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One system + user exchange; returns the assistant's text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible chat completions. The API key comes from `OPENAI_API_KEY`.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(settings: &LlmSettings) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(base) = &settings.api_base {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: settings.model.clone(),
            timeout: Duration::from_millis(settings.timeout_ms.max(1)),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system.to_string()).into(),
                ChatCompletionRequestUserMessage::from(user.to_string()).into(),
            ])
            .build()
            .map_err(|e| Error::Llm(e.to_string()))?;
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| Error::Llm(format!("chat completion timed out after {:?}", self.timeout)))?
            .map_err(|e| Error::Llm(e.to_string()))?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| Error::Llm("No content found in LLM response".into()))
    }
}

/// Parse the JSON object in a model reply, tolerating code fences and prose
/// around it.
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T> {
    let start = content.find('{');
    let end = content.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => return Err(Error::Llm(format!("no JSON object in reply: {content}"))),
    };
    serde_json::from_str(body).map_err(|e| Error::Llm(format!("malformed JSON reply: {e}")))
}
