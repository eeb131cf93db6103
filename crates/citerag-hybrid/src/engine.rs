//! The retrieval engine: ingestion into both indexes and the query pipeline
//! (route, expand, search, fuse, hydrate, rerank, cite).
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use citerag_core::chunker::Chunker;
use citerag_core::config::{DenseBackend, EngineConfig, ExpanderKind, RerankerKind};
use citerag_core::error::{Error, Result};
use citerag_core::traits::{DenseIndex, EmbeddingProvider, SparseIndex};
use citerag_core::types::{
    validate_collection, validate_roles, AccessFilter, Chunk, ChunkId, Citation, DenseRecord, Document, IngestReport, Query, RetrievalHit, SearchHit,
};
use citerag_embed::{provider_from_settings, CachedEmbedder, ResilientEmbedder};
use citerag_text::TantivySparseIndex;
use citerag_vector::{LanceDenseIndex, MemoryDenseIndex};

use crate::citation::map_citations;
use crate::expand::{LlmQueryExpander, QueryExpander, RuleBasedExpander};
use crate::fusion::{fuse, pool_hits, FusedHit, FusionStrategy};
use crate::llm::{ChatModel, OpenAiChat};
use crate::rerank::{apply_rerank, LlmReranker, Reranker, TermOverlapReranker};
use crate::selector::{DecisionMethod, RoutingSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalOutcome {
    Hits,
    NoKbHit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub retrieved_k: usize,
    pub hits: Vec<RetrievalHit>,
    pub citations: Vec<Citation>,
    pub outcome: RetrievalOutcome,
    pub collection: String,
    pub decision_method: DecisionMethod,
    pub expansions: Vec<String>,
    /// True when the dense path was skipped and results are sparse-only.
    pub degraded: bool,
}

/// Per-query pipeline state. Only forward transitions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    Pending,
    Searched,
    Fused,
    Empty,
}

impl RetrievalState {
    pub fn advance(self, next: Self) -> Result<Self> {
        match (self, next) {
            (Self::Pending, Self::Searched) | (Self::Searched, Self::Fused) | (Self::Searched, Self::Empty) => Ok(next),
            _ => Err(Error::Internal(format!("illegal retrieval transition {self:?} -> {next:?}"))),
        }
    }
}

enum SparseWrite {
    Index(Vec<Chunk>),
    Remove(Vec<ChunkId>),
}

pub struct RetrievalEngine {
    config: EngineConfig,
    chunker: Chunker,
    embedder: ResilientEmbedder,
    dense: Arc<dyn DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    expander: Arc<dyn QueryExpander>,
    reranker: Option<Arc<dyn Reranker>>,
    selector: RoutingSelector,
    strategy: FusionStrategy,
}

/// Assembles an engine; anything not set is derived from the config.
pub struct EngineBuilder {
    config: EngineConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    dense: Option<Arc<dyn DenseIndex>>,
    sparse: Option<Arc<dyn SparseIndex>>,
    expander: Option<Arc<dyn QueryExpander>>,
    reranker: Option<Option<Arc<dyn Reranker>>>,
    selector: Option<RoutingSelector>,
    chat: Option<Arc<dyn ChatModel>>,
}

impl EngineBuilder {
    /// Base embedding provider; batching, retries and caching are layered on top.
    pub fn embedder(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn dense(mut self, index: Arc<dyn DenseIndex>) -> Self {
        self.dense = Some(index);
        self
    }

    pub fn sparse(mut self, index: Arc<dyn SparseIndex>) -> Self {
        self.sparse = Some(index);
        self
    }

    pub fn expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// `None` disables reranking.
    pub fn reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn selector(mut self, selector: RoutingSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Chat model used by the LLM expander, reranker and router when configured.
    pub fn chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn build(self) -> Result<RetrievalEngine> {
        let config = self.config;
        config.validate()?;
        let chunker = Chunker::new(config.chunking())?;

        let base = match self.embedder {
            Some(provider) => provider,
            None => provider_from_settings(&config.embedding)?,
        };
        let cached: Arc<dyn EmbeddingProvider> = if config.embedding.cache_capacity > 0 {
            Arc::new(CachedEmbedder::new(base, config.embedding.cache_capacity))
        } else {
            base
        };
        let embedder = ResilientEmbedder::new(cached, &config.embedding);

        let chat = self.chat;
        let rules = RuleBasedExpander::new(config.synonyms.clone(), config.max_expansions);
        let expander: Arc<dyn QueryExpander> = match (self.expander, config.expander, chat.clone()) {
            (Some(expander), _, _) => expander,
            (None, ExpanderKind::Llm, Some(chat)) => Arc::new(LlmQueryExpander::new(chat, rules, config.max_expansions)),
            (None, ExpanderKind::Llm, None) => {
                warn!("llm expander configured without a chat model; using rules");
                Arc::new(rules)
            }
            (None, ExpanderKind::Rules, _) => Arc::new(rules),
        };
        let reranker: Option<Arc<dyn Reranker>> = match (self.reranker, config.reranker, chat.clone()) {
            (Some(reranker), _, _) => reranker,
            (None, RerankerKind::None, _) => None,
            (None, RerankerKind::Llm, Some(chat)) => Some(Arc::new(LlmReranker::new(chat))),
            (None, RerankerKind::Llm, None) => {
                warn!("llm reranker configured without a chat model; using term overlap");
                Some(Arc::new(TermOverlapReranker))
            }
            (None, RerankerKind::TermOverlap, _) => Some(Arc::new(TermOverlapReranker)),
        };
        let selector = self.selector.unwrap_or_else(|| RoutingSelector::from_settings(&config.routing, chat));

        Ok(RetrievalEngine {
            strategy: FusionStrategy::from_config(&config),
            chunker,
            embedder,
            dense: self.dense.unwrap_or_else(|| Arc::new(MemoryDenseIndex::new())),
            sparse: self.sparse.unwrap_or_else(|| Arc::new(TantivySparseIndex::in_memory())),
            expander,
            reranker,
            selector,
            config,
        })
    }
}

impl RetrievalEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder { config, embedder: None, dense: None, sparse: None, expander: None, reranker: None, selector: None, chat: None }
    }

    /// Engine over the configured backends. With `data_dir` set, the sparse
    /// index persists under `<data_dir>/sparse` and a Lance dense index under
    /// `<data_dir>/dense`.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder(config.clone());
        if let Some(root) = config.data_path() {
            builder = builder.sparse(Arc::new(TantivySparseIndex::open(root.join("sparse"))?));
            if config.dense_backend == DenseBackend::Lance {
                let dense_dir = root.join("dense");
                std::fs::create_dir_all(&dense_dir).map_err(Error::index)?;
                let uri = dense_dir.to_string_lossy().to_string();
                builder = builder.dense(Arc::new(LanceDenseIndex::open(&uri).await?));
            }
        }
        let wants_chat = config.expander == ExpanderKind::Llm || config.reranker == RerankerKind::Llm || config.routing.use_model;
        if wants_chat {
            builder = builder.chat(Arc::new(OpenAiChat::new(&config.llm)));
        }
        let engine = builder.build()?;
        info!(model = engine.embedder.model_id(), dim = engine.embedder.dim(), "retrieval engine ready");
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn model_id(&self) -> &str { self.embedder.model_id() }

    /// A query carrying the configured `top_k` and `min_score_threshold`.
    pub fn query(&self, text: impl Into<String>) -> Query {
        Query::new(text).top_k(self.config.top_k).min_score(self.config.min_score_threshold)
    }

    /// Chunk, embed and index one document into its `domain` collection.
    ///
    /// Chunks whose embedding batch fails are written to neither index and are
    /// reported in `failed_chunk_ids`. Chunk ids of a previous version that are
    /// not rewritten are removed once the new chunks are stored.
    #[instrument(skip_all, fields(document_id = %document.document_id, collection = %document.domain))]
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport> {
        let collection = document.domain.as_str();
        validate_collection(collection)?;
        if document.document_id.trim().is_empty() {
            return Err(Error::InvalidInput("document_id must not be empty".into()));
        }
        validate_roles(&document.access_roles)?;
        let model_id = self.embedder.model_id();
        if let Some(bound) = self.dense.model_id(collection).await? {
            if bound != model_id {
                return Err(Error::ModelMismatch { collection: collection.to_string(), expected: bound, actual: model_id.to_string() });
            }
        }

        let chunks = self.chunker.chunk(document);
        let previous = self.sparse.document_chunk_ids(collection, &document.document_id)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let mut records: Vec<DenseRecord> = Vec::with_capacity(chunks.len());
        let mut stored: Vec<Chunk> = Vec::with_capacity(chunks.len());
        let mut failed: Vec<ChunkId> = Vec::new();
        for outcome in self.embedder.embed_batches(&texts).await {
            let batch = &chunks[outcome.range];
            match outcome.result {
                Ok(vectors) => {
                    for (chunk, vector) in batch.iter().zip(vectors) {
                        records.push(DenseRecord {
                            chunk_id: chunk.chunk_id.clone(),
                            document_id: chunk.document_id.clone(),
                            access_roles: chunk.access_roles.clone(),
                            vector,
                        });
                        stored.push(chunk.clone());
                    }
                }
                Err(_) => failed.extend(batch.iter().map(|c| c.chunk_id.clone())),
            }
        }

        let embeddings_created = records.len();
        let stored_ids: Vec<ChunkId> = stored.iter().map(|c| c.chunk_id.clone()).collect();
        if !records.is_empty() {
            self.dense.upsert(collection, model_id, records).await?;
            if let Err(e) = self.sparse_write(collection, SparseWrite::Index(stored)).await {
                // vectors without a text record would never hydrate
                if let Err(cleanup) = self.dense.remove(collection, &stored_ids).await {
                    warn!(error = %cleanup, "failed to roll back dense vectors");
                }
                return Err(e);
            }
        }

        let kept: HashSet<&str> = stored_ids.iter().map(String::as_str).collect();
        let stale: Vec<ChunkId> = previous.into_iter().filter(|id| !kept.contains(id.as_str())).collect();
        if !stale.is_empty() {
            self.dense.remove(collection, &stale).await?;
            let removed = stale.len();
            self.sparse_write(collection, SparseWrite::Remove(stale)).await?;
            debug!(removed, "removed stale chunks");
        }

        if !failed.is_empty() {
            warn!(failed = failed.len(), "chunks skipped after embedding failures");
        }
        info!(chunks = chunks.len(), embeddings = embeddings_created, "ingested document");
        Ok(IngestReport { chunks_created: chunks.len(), embeddings_created, failed_chunk_ids: failed })
    }

    /// Tantivy commits block, so index writes run on the blocking pool.
    async fn sparse_write(&self, collection: &str, write: SparseWrite) -> Result<()> {
        let sparse = Arc::clone(&self.sparse);
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || match write {
            SparseWrite::Index(chunks) => sparse.index(&collection, &chunks),
            SparseWrite::Remove(ids) => sparse.remove(&collection, &ids),
        })
        .await
        .map_err(|e| Error::Internal(format!("sparse write task failed: {e}")))?
    }

    #[instrument(skip_all, fields(query = %query.raw_text))]
    pub async fn retrieve(&self, query: Query) -> Result<RetrievalResponse> {
        let raw = query.raw_text.trim();
        if raw.is_empty() {
            return Err(Error::InvalidInput("query text must not be empty".into()));
        }
        if query.top_k == 0 {
            return Err(Error::InvalidInput("top_k must be positive".into()));
        }
        query.access_filter().validate()?;
        let mut state = RetrievalState::Pending;
        let decision = self.selector.select_collection(raw, query.collection.as_deref(), &query.hints).await?;
        let collection = decision.collection.as_str();
        let filter = query.access_filter();
        let expansions = self.expander.expand(raw).await;
        let candidate_k = (query.top_k * 4).max(self.config.rerank_top_n);

        let (dense_hits, degraded) = self.dense_candidates(collection, &expansions, candidate_k, &filter, query.min_score).await?;
        let mut sparse_raw = Vec::new();
        for q in &expansions {
            sparse_raw.extend(self.sparse.search(collection, q, candidate_k, &filter)?);
        }
        let sparse_hits = pool_hits(sparse_raw);
        state = state.advance(RetrievalState::Searched)?;
        debug!(dense = dense_hits.len(), sparse = sparse_hits.len(), degraded, "candidates gathered");

        let fused = fuse(&dense_hits, &sparse_hits, self.strategy, self.config.fusion_weights);
        let hits = self.hydrate(collection, fused, &filter)?;

        let (hits, state) = if hits.is_empty() {
            (hits, state.advance(RetrievalState::Empty)?)
        } else {
            let hits = match &self.reranker {
                Some(reranker) => {
                    let timeout = Duration::from_millis(self.config.rerank_timeout_ms.max(1));
                    apply_rerank(reranker.as_ref(), raw, hits, self.config.rerank_top_n, timeout).await.0
                }
                None => hits,
            };
            (hits, state.advance(RetrievalState::Fused)?)
        };

        let mut hits = hits;
        hits.truncate(query.top_k);
        let citations = map_citations(&hits, collection);
        let outcome = if state == RetrievalState::Empty { RetrievalOutcome::NoKbHit } else { RetrievalOutcome::Hits };
        info!(collection, retrieved_k = hits.len(), ?outcome, degraded, "retrieval finished");
        Ok(RetrievalResponse {
            retrieved_k: hits.len(),
            hits,
            citations,
            outcome,
            collection: collection.to_string(),
            decision_method: decision.method,
            expansions,
            degraded,
        })
    }

    /// Dense hits pooled across expansions with `min_score` applied, plus
    /// whether the dense path had to be skipped.
    async fn dense_candidates(
        &self,
        collection: &str,
        expansions: &[String],
        k: usize,
        filter: &AccessFilter,
        min_score: f32,
    ) -> Result<(Vec<SearchHit>, bool)> {
        let Some(bound) = self.dense.model_id(collection).await? else {
            return Ok((Vec::new(), false));
        };
        if bound != self.embedder.model_id() {
            warn!(collection, expected = %bound, actual = self.embedder.model_id(), "embedding model mismatch; sparse-only");
            return Ok((Vec::new(), true));
        }
        let vectors = match self.embedder.embed(expansions).await {
            Ok(vectors) => vectors,
            Err(e @ (Error::EmbeddingUnavailable(_) | Error::DimensionMismatch { .. })) => {
                warn!(error = %e, "query embedding failed; sparse-only");
                return Ok((Vec::new(), true));
            }
            Err(e) => return Err(e),
        };
        let mut raw = Vec::new();
        for vector in &vectors {
            raw.extend(self.dense.search(collection, vector, k, filter).await?.into_iter().filter(|h| h.score >= min_score));
        }
        Ok((pool_hits(raw), false))
    }

    /// Attach chunk text from the sparse store, dropping anything the caller
    /// may not read or that no longer exists.
    fn hydrate(&self, collection: &str, fused: Vec<FusedHit>, filter: &AccessFilter) -> Result<Vec<RetrievalHit>> {
        if fused.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<ChunkId> = fused.iter().map(|h| h.chunk_id.clone()).collect();
        let chunks = self.sparse.fetch(collection, &ids)?;
        let mut by_id: std::collections::HashMap<ChunkId, Chunk> = chunks.into_iter().map(|c| (c.chunk_id.clone(), c)).collect();
        Ok(fused
            .into_iter()
            .filter_map(|hit| {
                let chunk = by_id.remove(&hit.chunk_id)?;
                if !filter.permits(&chunk.access_roles) {
                    warn!(chunk_id = %hit.chunk_id, "dropping hit that fails access check");
                    return None;
                }
                Some(RetrievalHit {
                    chunk_id: hit.chunk_id,
                    document_id: chunk.document_id,
                    text: chunk.text,
                    dense_score: hit.dense_score,
                    sparse_score: hit.sparse_score,
                    fused_score: hit.fused_score,
                    rerank_score: None,
                })
            })
            .collect())
    }
}
