//! Batching, timeouts and bounded retries around any embedding provider.
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use citerag_core::config::{EmbeddingSettings, MAX_EMBED_BATCH, MAX_RETRIES};
use citerag_core::error::{Error, Result};
use citerag_core::traits::EmbeddingProvider;

/// Outcome of one provider call covering `texts[range]`.
#[derive(Debug)]
pub struct BatchOutcome {
    pub range: Range<usize>,
    pub result: Result<Vec<Vec<f32>>>,
}

pub struct ResilientEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
    max_retries: usize,
    backoff_ms: u64,
}

impl ResilientEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, settings: &EmbeddingSettings) -> Self {
        Self {
            inner,
            batch_size: settings.batch_size.clamp(1, MAX_EMBED_BATCH),
            timeout: Duration::from_millis(settings.timeout_ms.max(1)),
            max_retries: settings.max_retries.min(MAX_RETRIES),
            backoff_ms: settings.backoff_ms,
        }
    }

    /// Embed `texts` in provider-sized batches. A failing batch does not stop
    /// the ones after it; callers decide what to do with partial results.
    pub async fn embed_batches(&self, texts: &[String]) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::new();
        let mut start = 0usize;
        while start < texts.len() {
            let end = (start + self.batch_size).min(texts.len());
            let result = self.embed_with_retry(&texts[start..end]).await;
            if let Err(e) = &result {
                warn!(batch_start = start, batch_end = end, error = %e, "embedding batch failed");
            }
            outcomes.push(BatchOutcome { range: start..end, result });
            start = end;
        }
        outcomes
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.backoff_ms.max(1))
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);
        RetryIf::spawn(strategy, || self.embed_once(batch), |e: &Error| matches!(e, Error::EmbeddingUnavailable(_))).await
    }

    async fn embed_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = tokio::time::timeout(self.timeout, self.inner.embed(batch))
            .await
            .map_err(|_| Error::EmbeddingUnavailable(format!("timed out after {:?}", self.timeout)))??;
        if vectors.len() != batch.len() {
            return Err(Error::EmbeddingUnavailable(format!("asked for {} vectors, got {}", batch.len(), vectors.len())));
        }
        let dim = self.inner.dim();
        for v in &vectors {
            if v.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: v.len() });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(Error::EmbeddingUnavailable("provider returned non-finite values".into()));
            }
        }
        debug!(batch = batch.len(), model = self.inner.model_id(), "embedded batch");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for ResilientEmbedder {
    fn model_id(&self) -> &str { self.inner.model_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for outcome in self.embed_batches(texts).await {
            out.extend(outcome.result?);
        }
        Ok(out)
    }
}
