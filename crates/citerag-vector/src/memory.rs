use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use citerag_core::error::{Error, Result};
use citerag_core::traits::DenseIndex;
use citerag_core::types::{validate_collection, validate_roles, AccessFilter, ChunkId, DenseRecord, SearchHit, SourceKind};

use crate::{check_dims, cosine, rank_hits};

struct Partition {
    model_id: String,
    dim: usize,
    records: HashMap<ChunkId, Arc<DenseRecord>>,
}

/// Exact cosine search over per-collection maps held in memory. Entries are
/// swapped whole, so a reader sees either the old or the new vector of a chunk.
#[derive(Default)]
pub struct MemoryDenseIndex {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl MemoryDenseIndex {
    pub fn new() -> Self { Self::default() }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Partition>>> {
        self.partitions.read().map_err(|_| Error::IndexUnavailable("dense index lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Partition>>> {
        self.partitions.write().map_err(|_| Error::IndexUnavailable("dense index lock poisoned".into()))
    }

    pub fn len(&self, collection: &str) -> usize {
        self.read().ok().and_then(|p| p.get(collection).map(|p| p.records.len())).unwrap_or(0)
    }
}

#[async_trait]
impl DenseIndex for MemoryDenseIndex {
    async fn upsert(&self, collection: &str, model_id: &str, records: Vec<DenseRecord>) -> Result<()> {
        validate_collection(collection)?;
        records.iter().try_for_each(|r| validate_roles(&r.access_roles))?;
        let Some(dim) = records.first().map(|r| r.vector.len()) else { return Ok(()) };
        check_dims(&records, dim)?;
        let mut partitions = self.write()?;
        let partition = partitions
            .entry(collection.to_string())
            .or_insert_with(|| Partition { model_id: model_id.to_string(), dim, records: HashMap::new() });
        if partition.records.is_empty() {
            partition.model_id = model_id.to_string();
            partition.dim = dim;
        }
        if partition.model_id != model_id {
            return Err(Error::ModelMismatch {
                collection: collection.to_string(),
                expected: partition.model_id.clone(),
                actual: model_id.to_string(),
            });
        }
        if partition.dim != dim {
            return Err(Error::DimensionMismatch { expected: partition.dim, actual: dim });
        }
        let n = records.len();
        for r in records {
            partition.records.insert(r.chunk_id.clone(), Arc::new(r));
        }
        debug!(collection, upserted = n, total = partition.records.len(), "dense upsert");
        Ok(())
    }

    async fn remove(&self, collection: &str, chunk_ids: &[ChunkId]) -> Result<()> {
        validate_collection(collection)?;
        let mut partitions = self.write()?;
        if let Some(partition) = partitions.get_mut(collection) {
            for id in chunk_ids {
                partition.records.remove(id);
            }
            if partition.records.is_empty() {
                partitions.remove(collection);
            }
        }
        Ok(())
    }

    async fn search(&self, collection: &str, vector: &[f32], k: usize, filter: &AccessFilter) -> Result<Vec<SearchHit>> {
        validate_collection(collection)?;
        filter.validate()?;
        let partitions = self.read()?;
        let Some(partition) = partitions.get(collection) else { return Ok(Vec::new()) };
        if vector.len() != partition.dim {
            return Err(Error::DimensionMismatch { expected: partition.dim, actual: vector.len() });
        }
        let hits = partition
            .records
            .values()
            .filter(|r| filter.permits(&r.access_roles))
            .map(|r| SearchHit { id: r.chunk_id.clone(), score: cosine(vector, &r.vector), source: SourceKind::Dense })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn model_id(&self, collection: &str) -> Result<Option<String>> {
        Ok(self.read()?.get(collection).map(|p| p.model_id.clone()))
    }
}
