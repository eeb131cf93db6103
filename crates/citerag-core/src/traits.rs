use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AccessFilter, Chunk, ChunkId, DenseRecord, SearchHit};

/// Converts text into fixed-length dense vectors.
///
/// Every vector produced by one provider has `dim()` components and belongs to
/// the model named by `model_id()`; vectors from different models are not
/// comparable.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Vector store partitioned by collection.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Insert or fully replace the vectors of `records` in `collection`.
    async fn upsert(&self, collection: &str, model_id: &str, records: Vec<DenseRecord>) -> Result<()>;
    async fn remove(&self, collection: &str, chunk_ids: &[ChunkId]) -> Result<()>;
    /// Cosine-ranked hits visible through `filter`, best first.
    async fn search(&self, collection: &str, vector: &[f32], k: usize, filter: &AccessFilter) -> Result<Vec<SearchHit>>;
    /// Embedding model the collection was built with, if it holds any vectors.
    async fn model_id(&self, collection: &str) -> Result<Option<String>>;
}

/// Lexical index partitioned by collection. Also the system of record for
/// chunk text, so hits can be hydrated after fusion.
pub trait SparseIndex: Send + Sync {
    fn index(&self, collection: &str, chunks: &[Chunk]) -> Result<()>;
    fn remove(&self, collection: &str, chunk_ids: &[ChunkId]) -> Result<()>;
    fn search(&self, collection: &str, query: &str, k: usize, filter: &AccessFilter) -> Result<Vec<SearchHit>>;
    fn fetch(&self, collection: &str, chunk_ids: &[ChunkId]) -> Result<Vec<Chunk>>;
    fn document_chunk_ids(&self, collection: &str, document_id: &str) -> Result<Vec<ChunkId>>;
}
