//! Merging dense and sparse rankings into one list.
//!
//! Dense cosine and BM25 live on unrelated scales, so scores are either
//! rank-based (RRF) or min-max normalized per list before weighting. Both
//! strategies report a fused score in [0,1].
use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use citerag_core::config::{EngineConfig, FusionStrategyKind, FusionWeights};
use citerag_core::types::{ChunkId, SearchHit};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FusionStrategy {
    Rrf { k: f32 },
    WeightedMinMax,
}

impl Default for FusionStrategy {
    fn default() -> Self {
        Self::Rrf { k: 60.0 }
    }
}

impl FusionStrategy {
    pub fn from_config(config: &EngineConfig) -> Self {
        match config.fusion_strategy {
            FusionStrategyKind::Rrf => Self::Rrf { k: config.rrf_k },
            FusionStrategyKind::Weighted => Self::WeightedMinMax,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub chunk_id: ChunkId,
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
    pub fused_score: f32,
}

impl FusedHit {
    pub fn in_both(&self) -> bool { self.dense_score.is_some() && self.sparse_score.is_some() }
}

/// Scale scores to [0,1]. A list whose values are all equal maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let finite = scores.iter().copied().filter(|s| s.is_finite());
    let (min, max) = finite.fold((f32::MAX, f32::MIN), |(lo, hi), s| (lo.min(s), hi.max(s)));
    if min > max {
        return vec![0.0; scores.len()];
    }
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores
        .iter()
        .map(|s| if s.is_finite() { ((s - min) / (max - min)).clamp(0.0, 1.0) } else { 0.0 })
        .collect()
}

/// Merge per-expansion result lists: one entry per chunk, keeping its best
/// score, ordered best first (ties by chunk id).
pub fn pool_hits<I: IntoIterator<Item = SearchHit>>(hits: I) -> Vec<SearchHit> {
    let mut best: HashMap<ChunkId, SearchHit> = HashMap::new();
    for hit in hits {
        match best.get_mut(&hit.id) {
            Some(existing) if existing.score >= hit.score => {}
            Some(existing) => *existing = hit,
            None => {
                best.insert(hit.id.clone(), hit);
            }
        }
    }
    let mut pooled: Vec<SearchHit> = best.into_values().collect();
    pooled.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    pooled
}

/// Fuse two ranked lists (each best first, unique ids).
pub fn fuse(dense: &[SearchHit], sparse: &[SearchHit], strategy: FusionStrategy, weights: FusionWeights) -> Vec<FusedHit> {
    let mut fused: HashMap<ChunkId, FusedHit> = HashMap::new();
    let total_weight = (weights.dense + weights.sparse).max(f32::EPSILON);

    let mut contribute = |hits: &[SearchHit], weight: f32, is_dense: bool| {
        let normalized = match strategy {
            FusionStrategy::WeightedMinMax => min_max_normalize(&hits.iter().map(|h| h.score).collect::<Vec<_>>()),
            FusionStrategy::Rrf { .. } => Vec::new(),
        };
        for (rank, hit) in hits.iter().enumerate() {
            let part = match strategy {
                FusionStrategy::Rrf { k } => weight / (k + rank as f32 + 1.0) / (total_weight / (1.0 + k)),
                FusionStrategy::WeightedMinMax => weight * normalized[rank] / total_weight,
            };
            let entry = fused.entry(hit.id.clone()).or_insert_with(|| FusedHit {
                chunk_id: hit.id.clone(),
                dense_score: None,
                sparse_score: None,
                fused_score: 0.0,
            });
            entry.fused_score += part;
            if is_dense {
                entry.dense_score = Some(hit.score);
            } else {
                entry.sparse_score = Some(hit.score);
            }
        }
    };
    contribute(dense, weights.dense, true);
    contribute(sparse, weights.sparse, false);

    let mut out: Vec<FusedHit> = fused.into_values().collect();
    for hit in &mut out {
        hit.fused_score = hit.fused_score.clamp(0.0, 1.0);
    }
    out.sort_by(compare_fused);
    out
}

/// Fused score descending, then agreement between retrievers, then chunk id.
fn compare_fused(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| b.in_both().cmp(&a.in_both()))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
