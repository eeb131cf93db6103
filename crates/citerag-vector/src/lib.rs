//! Dense (vector) indexes: an exact in-memory index and a LanceDB-backed one.
use citerag_core::error::{Error, Result};
use citerag_core::types::{DenseRecord, SearchHit};

pub mod lance;
pub mod memory;
pub mod schema;
pub mod table;

pub use lance::LanceDenseIndex;
pub use memory::MemoryDenseIndex;

/// Cosine similarity; 0 when either side has no magnitude.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

pub(crate) fn check_dims(records: &[DenseRecord], dim: usize) -> Result<()> {
    if dim == 0 {
        return Err(Error::InvalidInput("empty vector".into()));
    }
    match records.iter().find(|r| r.vector.len() != dim) {
        Some(r) => Err(Error::DimensionMismatch { expected: dim, actual: r.vector.len() }),
        None => Ok(()),
    }
}

/// Best first, ties by chunk id, truncated to `k`.
pub(crate) fn rank_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(k);
    hits
}
