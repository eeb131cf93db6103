//! Choosing `min_score_threshold` from labeled queries.
//!
//! Each labeled query is retrieved with no dense cutoff; the dense similarity
//! of every returned hit is sorted into a relevant or irrelevant bucket, and the
//! threshold maximising Youden's J (TPR - FPR) is suggested.
use serde::{Deserialize, Serialize};
use tracing::info;

use citerag_core::error::Result;

use crate::engine::RetrievalEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledQuery {
    pub query: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Relevant chunk ids or document ids.
    pub relevant: Vec<String>,
}

impl LabeledQuery {
    fn is_relevant(&self, chunk_id: &str, document_id: &str) -> bool {
        self.relevant.iter().any(|r| r == chunk_id || r == document_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub min: f32,
    pub p10: f32,
    pub p25: f32,
    pub p50: f32,
    pub p75: f32,
    pub p90: f32,
    pub max: f32,
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[f32], pct: usize) -> f32 {
    let rank = (pct * sorted.len()).div_ceil(100);
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl ScoreSummary {
    pub fn from_scores(scores: &[f32]) -> Self {
        let mut sorted: Vec<f32> = scores.iter().copied().filter(|s| s.is_finite()).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f32::total_cmp);
        Self {
            count: sorted.len(),
            min: sorted[0],
            p10: percentile(&sorted, 10),
            p25: percentile(&sorted, 25),
            p50: percentile(&sorted, 50),
            p75: percentile(&sorted, 75),
            p90: percentile(&sorted, 90),
            max: sorted[sorted.len() - 1],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub relevant: ScoreSummary,
    pub irrelevant: ScoreSummary,
    pub suggested_threshold: Option<f32>,
    pub youden_j: Option<f32>,
}

/// Threshold (one of the observed scores) with the highest TPR - FPR; the
/// lowest such threshold wins ties. `None` without relevant scores.
pub fn suggest_threshold(relevant: &[f32], irrelevant: &[f32]) -> Option<(f32, f32)> {
    if relevant.is_empty() {
        return None;
    }
    let mut candidates: Vec<f32> = relevant.iter().chain(irrelevant).copied().filter(|s| s.is_finite()).collect();
    candidates.sort_by(f32::total_cmp);
    candidates.dedup();
    let rate = |scores: &[f32], t: f32| {
        if scores.is_empty() { 0.0 } else { scores.iter().filter(|s| **s >= t).count() as f32 / scores.len() as f32 }
    };
    let mut best: Option<(f32, f32)> = None;
    for t in candidates {
        let j = rate(relevant, t) - rate(irrelevant, t);
        if best.map_or(true, |(_, bj)| j > bj) {
            best = Some((t, j));
        }
    }
    best
}

pub async fn calibrate(engine: &RetrievalEngine, labeled: &[LabeledQuery]) -> Result<CalibrationReport> {
    let mut relevant = Vec::new();
    let mut irrelevant = Vec::new();
    for item in labeled {
        let mut query = engine.query(item.query.clone()).min_score(0.0);
        query.collection = item.collection.clone();
        query.role = item.role.clone();
        let response = engine.retrieve(query).await?;
        for hit in &response.hits {
            let Some(score) = hit.dense_score else { continue };
            if item.is_relevant(&hit.chunk_id, &hit.document_id) {
                relevant.push(score);
            } else {
                irrelevant.push(score);
            }
        }
    }
    let suggestion = suggest_threshold(&relevant, &irrelevant);
    let report = CalibrationReport {
        relevant: ScoreSummary::from_scores(&relevant),
        irrelevant: ScoreSummary::from_scores(&irrelevant),
        suggested_threshold: suggestion.map(|(t, _)| t),
        youden_j: suggestion.map(|(_, j)| j),
    };
    info!(
        queries = labeled.len(),
        relevant = report.relevant.count,
        irrelevant = report.irrelevant.count,
        threshold = ?report.suggested_threshold,
        "calibration finished"
    );
    Ok(report)
}
