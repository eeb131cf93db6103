//! Embedding providers: a hashed embedder for offline use, local BGE-M3 via
//! candle, and OpenAI-compatible remote models, plus the batching/retry and
//! caching wrappers the engine puts around them.
use std::sync::Arc;

use citerag_core::config::{EmbeddingBackend, EmbeddingSettings};
use citerag_core::error::{Error, Result};
use citerag_core::traits::EmbeddingProvider;

pub mod cache;
pub mod device;
pub mod hashed;
pub mod local;
pub mod openai;
pub mod pool;
pub mod resilient;
pub mod tokenize;

pub use cache::CachedEmbedder;
pub use hashed::HashedEmbedder;
pub use local::BgeM3Embedder;
pub use openai::OpenAiEmbedder;
pub use pool::masked_mean_l2;
pub use resilient::{BatchOutcome, ResilientEmbedder};

/// Build the configured base provider (no retry or cache layers).
pub fn provider_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match settings.backend {
        EmbeddingBackend::Hashed => Arc::new(HashedEmbedder::new(settings.dimensions)),
        EmbeddingBackend::Openai => {
            let dims = u32::try_from(settings.dimensions).map_err(|e| Error::InvalidConfig(e.to_string()))?;
            Arc::new(OpenAiEmbedder::new(settings.model.clone(), dims, settings.api_base.as_deref()))
        }
        EmbeddingBackend::Local => {
            let configured = settings.model_dir.as_deref().map(citerag_core::config::expand_path);
            let dir = local::resolve_model_dir(configured.as_deref()).map_err(|e| Error::InvalidConfig(e.to_string()))?;
            Arc::new(BgeM3Embedder::load(&dir).map_err(Error::embedding)?)
        }
    })
}
