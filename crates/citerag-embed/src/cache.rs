use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use citerag_core::error::{Error, Result};
use citerag_core::traits::EmbeddingProvider;

/// Cache key: blake3 of the text, scoped to the model that produced the vector.
pub fn content_hash(model_id: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[derive(Default)]
struct Entries {
    vectors: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

/// Memoizes vectors by content so re-ingesting unchanged chunks and repeating
/// queries skip the provider. Oldest entries are evicted first.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    capacity: usize,
    entries: Mutex<Entries>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        Self { inner, capacity, entries: Mutex::new(Entries::default()) }
    }

    pub fn len(&self) -> usize { self.entries.lock().map(|e| e.vectors.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>> {
        self.entries.lock().map_err(|_| Error::EmbeddingUnavailable("embedding cache lock poisoned".into()))
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn model_id(&self) -> &str { self.inner.model_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| content_hash(self.inner.model_id(), t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = {
            let entries = self.lock()?;
            keys.iter().map(|k| entries.vectors.get(k).cloned()).collect()
        };
        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed(&batch).await?;
            if fresh.len() != batch.len() {
                return Err(Error::EmbeddingUnavailable(format!("asked for {} vectors, got {}", batch.len(), fresh.len())));
            }
            let mut entries = self.lock()?;
            for (&i, v) in missing.iter().zip(fresh) {
                if self.capacity > 0 && !entries.vectors.contains_key(&keys[i]) {
                    while entries.order.len() >= self.capacity {
                        match entries.order.pop_front() {
                            Some(old) => {
                                entries.vectors.remove(&old);
                            }
                            None => break,
                        }
                    }
                    entries.order.push_back(keys[i].clone());
                    entries.vectors.insert(keys[i].clone(), v.clone());
                }
                out[i] = Some(v);
            }
        }
        Ok(out.into_iter().flatten().collect())
    }
}
