//! Token-window chunking with overlap, plus a directory loader for callers that
//! ingest plain files.
//!
//! A token is a maximal run of non-whitespace characters. Chunk text is always
//! an exact byte slice of the document, so overlap can be stripped to recover
//! the source verbatim.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{chunk_id, Chunk, Document, Roles};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk.
    pub chunk_size: usize,
    /// Tokens shared with the previous chunk.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 600, overlap: 80 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be greater than zero".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig { self.config }

    /// Split a document into ordered, overlapping chunks.
    ///
    /// Empty or whitespace-only documents yield no chunks.
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.raw_text.as_str();
        let spans = token_spans(text);
        if spans.is_empty() {
            warn!(document_id = %document.document_id, "document has no content; no chunks produced");
            return Vec::new();
        }

        let step = self.config.chunk_size - self.config.overlap;
        let total = spans.len();
        let mut chunks = Vec::new();
        let mut first = 0usize;
        loop {
            let last = (first + self.config.chunk_size).min(total);
            let index = chunks.len();
            let start = if index == 0 { 0 } else { spans[first].0 };
            let end = if last == total { text.len() } else { spans[last].0 };
            chunks.push(Chunk {
                chunk_id: chunk_id(&document.document_id, index),
                document_id: document.document_id.clone(),
                title: document.title.clone(),
                index,
                text: text[start..end].to_string(),
                token_count: last - first,
                domain: document.domain.clone(),
                access_roles: document.access_roles.clone(),
                start,
                end,
            });
            if last >= total {
                break;
            }
            first += step;
        }
        debug!(document_id = %document.document_id, tokens = total, chunks = chunks.len(), "chunked document");
        chunks
    }
}

/// Number of whitespace-delimited tokens in `text`.
pub fn count_tokens(text: &str) -> usize { text.split_whitespace().count() }

/// Byte ranges of every non-whitespace run in `text`.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut open: Option<usize> = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), open) {
            (false, None) => open = Some(i),
            (true, Some(s)) => {
                spans.push((s, i));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(s) = open {
        spans.push((s, text.len()));
    }
    spans
}

/// Rebuild the source text from chunks in index order by dropping the bytes
/// each chunk shares with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut prev_end = 0usize;
    for c in chunks {
        let skip = prev_end.saturating_sub(c.start).min(c.text.len());
        out.push_str(&c.text[skip..]);
        prev_end = c.end;
    }
    out
}

/// Loads `.txt`/`.md` files under a directory as documents of one collection.
pub struct DirectoryLoader {
    domain: String,
    access_roles: Roles,
}

impl DirectoryLoader {
    pub fn new(domain: impl Into<String>, access_roles: Roles) -> Self {
        Self { domain: domain.into(), access_roles }
    }

    pub fn load(&self, root: &Path) -> anyhow::Result<Vec<Document>> {
        let files = list_text_files(root);
        if files.is_empty() {
            warn!(root = %root.display(), "no .txt or .md files found");
        }
        let mut documents = Vec::with_capacity(files.len());
        for path in files {
            let raw_text = read_file_content(&path)?;
            let document_id = extract_doc_id(&path)?;
            documents.push(Document {
                title: document_id.clone(),
                document_id,
                domain: self.domain.clone(),
                access_roles: self.access_roles.clone(),
                raw_text,
            });
        }
        Ok(documents)
    }
}

fn read_file_content(path: &Path) -> anyhow::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

fn extract_doc_id(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", path.display()))
}

fn list_text_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| matches!(p.extension().and_then(|s| s.to_str()), Some("txt" | "md")))
        .collect();
    files.sort();
    files
}
