use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use citerag_core::config::EmbeddingSettings;
use citerag_core::error::{Error, Result};
use citerag_core::traits::EmbeddingProvider;
use citerag_embed::{CachedEmbedder, HashedEmbedder, ResilientEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("text number {i}")).collect()
}

fn fast_settings(batch_size: usize, max_retries: usize) -> EmbeddingSettings {
    EmbeddingSettings { batch_size, max_retries, backoff_ms: 1, timeout_ms: 200, ..EmbeddingSettings::default() }
}

/// Fails the first `failures` calls, and any batch containing `poison`.
struct Flaky {
    inner: HashedEmbedder,
    failures: AtomicUsize,
    calls: AtomicUsize,
    poison: Option<String>,
}

impl Flaky {
    fn new(failures: usize) -> Self {
        Self { inner: HashedEmbedder::new(16), failures: AtomicUsize::new(failures), calls: AtomicUsize::new(0), poison: None }
    }
}

#[async_trait]
impl EmbeddingProvider for Flaky {
    fn model_id(&self) -> &str { self.inner.model_id() }
    fn dim(&self) -> usize { self.inner.dim() }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.poison.as_ref().is_some_and(|p| texts.contains(p)) {
            return Err(Error::EmbeddingUnavailable("poisoned batch".into()));
        }
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::EmbeddingUnavailable("503".into()));
        }
        self.inner.embed(texts).await
    }
}

struct Slow;

#[async_trait]
impl EmbeddingProvider for Slow {
    fn model_id(&self) -> &str { "slow" }
    fn dim(&self) -> usize { 4 }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(vec![vec![0.5; 4]; texts.len()])
    }
}

struct WrongDim;

#[async_trait]
impl EmbeddingProvider for WrongDim {
    fn model_id(&self) -> &str { "wrong" }
    fn dim(&self) -> usize { 8 }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(vec![vec![0.1; 3]; texts.len()]) }
}

#[tokio::test]
async fn hashed_embedder_is_normalized_and_deterministic() {
    let e = HashedEmbedder::new(64);
    let v = e.embed(&["Vacation days accrue monthly".into(), "Vacation days accrue monthly".into()]).await.unwrap();
    assert_eq!(v[0].len(), 64);
    assert!((cosine(&v[0], &v[0]) - 1.0).abs() < 1e-4);
    assert_eq!(v[0], v[1]);
    assert_eq!(e.model_id(), "hashed-xxh64-d64");
}

#[tokio::test]
async fn hashed_similarity_tracks_shared_vocabulary() {
    let e = HashedEmbedder::new(256);
    let q = e.embed_text("How many vacation days do I get?");
    let related = e.embed_text("Employees accrue 20 vacation days per year.");
    let unrelated = e.embed_text("Reset the router firmware before deploying.");
    assert!(cosine(&q, &related) > cosine(&q, &unrelated));
    assert!(cosine(&q, &related) > 0.3);
    assert!(e.embed_text("").iter().all(|x| *x == 0.0));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let flaky = Arc::new(Flaky::new(2));
    let resilient = ResilientEmbedder::new(flaky.clone(), &fast_settings(100, 2));
    let out = resilient.embed(&texts(3)).await.expect("third attempt succeeds");
    assert_eq!(out.len(), 3);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let flaky = Arc::new(Flaky::new(10));
    let resilient = ResilientEmbedder::new(flaky.clone(), &fast_settings(100, 5));
    let err = resilient.embed(&texts(2)).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    // one attempt plus at most two retries, whatever was configured
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn batches_fail_independently() {
    let all = texts(250);
    let mut flaky = Flaky::new(0);
    flaky.poison = Some(all[150].clone());
    let resilient = ResilientEmbedder::new(Arc::new(flaky), &fast_settings(100, 0));
    let outcomes = resilient.embed_batches(&all).await;
    let ranges: Vec<_> = outcomes.iter().map(|o| o.range.clone()).collect();
    assert_eq!(ranges, vec![0..100, 100..200, 200..250]);
    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_err());
    assert_eq!(outcomes[2].result.as_ref().map(|v| v.len()).ok(), Some(50));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let resilient = ResilientEmbedder::new(Arc::new(Slow), &fast_settings(10, 0));
    let err = resilient.embed(&texts(1)).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(ref m) if m.contains("timed out")));
}

#[tokio::test]
async fn wrong_dimension_is_rejected_without_retry() {
    let resilient = ResilientEmbedder::new(Arc::new(WrongDim), &fast_settings(10, 2));
    let err = resilient.embed(&texts(1)).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 8, actual: 3 }));
}

#[tokio::test]
async fn cache_skips_provider_for_known_texts() {
    let flaky = Arc::new(Flaky::new(0));
    let cached = CachedEmbedder::new(flaky.clone(), 2);
    let first = cached.embed(&["a b".into(), "c d".into()]).await.unwrap();
    let again = cached.embed(&["c d".into(), "a b".into()]).await.unwrap();
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first[0], again[1]);
    assert_eq!(first[1], again[0]);

    cached.embed(&["e f".into()]).await.unwrap();
    assert_eq!(cached.len(), 2);
    cached.embed(&["a b".into()]).await.unwrap();
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3, "oldest entry was evicted");
}
