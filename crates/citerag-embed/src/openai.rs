use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client;
use async_trait::async_trait;

use citerag_core::error::{Error, Result};
use citerag_core::traits::EmbeddingProvider;

/// Remote embeddings from any OpenAI-compatible `/embeddings` endpoint.
/// The API key comes from `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: u32,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>, dimensions: u32, api_base: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        Self { client: Client::with_config(config), model: model.into(), dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str { &self.model }

    fn dim(&self) -> usize { self.dimensions as usize }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(texts.to_vec())
            .dimensions(self.dimensions)
            .build()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let response = self.client.embeddings().create(request).await.map_err(Error::embedding)?;
        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}
