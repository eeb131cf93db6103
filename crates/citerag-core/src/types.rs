//! Domain types shared by the chunker, the indexes and the hybrid engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type Roles = BTreeSet<String>;

/// A named piece of source content handed to the engine for ingestion.
///
/// - `document_id`: stable identity (file stem or external id)
/// - `domain`: collection the document belongs to; the isolation key
/// - `access_roles`: roles allowed to read it; empty means public
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub domain: String,
    #[serde(default)]
    pub access_roles: Roles,
    pub raw_text: String,
}

impl Document {
    pub fn new(document_id: impl Into<String>, domain: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let document_id = document_id.into();
        Self { title: document_id.clone(), document_id, domain: domain.into(), access_roles: Roles::new(), raw_text: raw_text.into() }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// A contiguous slice of a document that is independently indexed.
///
/// `start`/`end` are byte offsets into `Document::raw_text`; `text` is exactly
/// `raw_text[start..end]`, so neighbouring chunks share their overlap bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub title: String,
    pub index: usize,
    pub text: String,
    pub token_count: usize,
    pub domain: String,
    pub access_roles: Roles,
    pub start: usize,
    pub end: usize,
}

/// Deterministic chunk identifier: `{document_id}#{index:03}`.
pub fn chunk_id(document_id: &str, index: usize) -> ChunkId {
    format!("{document_id}#{index:03}")
}

/// Collection names end up in directory and table names.
pub fn validate_collection(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok { Ok(()) } else { Err(Error::InvalidInput(format!("invalid collection name '{name}'"))) }
}

/// Role names are stored delimited and matched with LIKE in the dense index,
/// so delimiter and wildcard characters are refused.
pub fn validate_role(role: &str) -> Result<()> {
    let ok = !role.is_empty()
        && role.len() <= 64
        && role.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':');
    if ok { Ok(()) } else { Err(Error::InvalidInput(format!("invalid role name '{role}'"))) }
}

pub fn validate_roles(roles: &Roles) -> Result<()> {
    roles.iter().try_for_each(|r| validate_role(r))
}

/// Access predicate applied by both indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFilter {
    pub role: Option<String>,
}

impl AccessFilter {
    /// Anonymous access: public chunks only.
    pub fn public() -> Self { Self { role: None } }

    pub fn for_role(role: impl Into<String>) -> Self { Self { role: Some(role.into()) } }

    pub fn validate(&self) -> Result<()> {
        self.role.as_deref().map_or(Ok(()), validate_role)
    }

    pub fn permits(&self, roles: &Roles) -> bool {
        roles.is_empty() || self.role.as_ref().is_some_and(|r| roles.contains(r))
    }
}

/// Indicates which retriever produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Dense,
    Sparse,
}

/// The minimal surface returned by both indexes.
///
/// `id` matches `Chunk::chunk_id`. `score` is retriever-specific (cosine for
/// dense, BM25 for sparse) but higher is always better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
}

/// One vector plus the metadata the dense index needs for filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseRecord {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub access_roles: Roles,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub raw_text: String,
    pub collection: Option<String>,
    pub role: Option<String>,
    pub top_k: usize,
    pub min_score: f32,
    /// Collections the caller considers plausible; narrows routing.
    #[serde(default)]
    pub hints: Vec<String>,
}

impl Query {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self { raw_text: raw_text.into(), collection: None, role: None, top_k: 6, min_score: 0.25, hints: Vec::new() }
    }

    pub fn in_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn as_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn access_filter(&self) -> AccessFilter { AccessFilter { role: self.role.clone() } }
}

/// A fused, hydrated hit. Scores are query-relative and never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
    pub fused_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RetrievalHit {
    /// Score used for citations: the rerank judgment when there is one.
    pub fn final_score(&self) -> f32 { self.rerank_score.unwrap_or(self.fused_score) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub cit_id: String,
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub score: f32,
    pub source_collection: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub chunks_created: usize,
    pub embeddings_created: usize,
    pub failed_chunk_ids: Vec<ChunkId>,
}
