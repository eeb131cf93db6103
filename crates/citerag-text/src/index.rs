//! citerag-text
//!
//! Tantivy-backed sparse index with one index per collection. Each collection
//! lives in RAM or under `<root>/<collection>/`; chunk text and metadata are
//! stored fields so hits can be hydrated without another store.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use tantivy::directory::MmapDirectory;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use citerag_core::error::{Error, Result};
use citerag_core::traits::SparseIndex;
use citerag_core::types::{validate_collection, AccessFilter, Chunk, ChunkId, SearchHit};

use crate::tantivy_utils::{build_schema, fields, register_tokenizer, Fields, PUBLIC_ROLE};

const WRITER_HEAP_BYTES: usize = 20_000_000;

pub(crate) struct CollectionIndex {
	pub(crate) index: Index,
	pub(crate) reader: IndexReader,
	writer: Mutex<IndexWriter>,
	pub(crate) fields: Fields,
}

impl CollectionIndex {
	fn open(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = fields(&index.schema())?;
		let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(Error::index)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(Error::index)?;
		Ok(Self { index, reader, writer: Mutex::new(writer), fields })
	}

	fn to_document(&self, c: &Chunk) -> TantivyDocument {
		let f = &self.fields;
		let mut doc = TantivyDocument::default();
		doc.add_text(f.chunk_id, &c.chunk_id);
		doc.add_text(f.document_id, &c.document_id);
		doc.add_text(f.title, &c.title);
		doc.add_text(f.domain, &c.domain);
		doc.add_text(f.text, &c.text);
		if c.access_roles.is_empty() {
			doc.add_text(f.roles, PUBLIC_ROLE);
		}
		for role in &c.access_roles {
			doc.add_text(f.roles, role);
		}
		doc.add_u64(f.chunk_index, c.index as u64);
		doc.add_u64(f.token_count, c.token_count as u64);
		doc.add_u64(f.start, c.start as u64);
		doc.add_u64(f.end, c.end as u64);
		doc
	}

	/// Apply deletes and adds in one commit, then make them visible.
	fn write(&self, deletes: &[ChunkId], adds: &[Chunk]) -> Result<()> {
		let mut writer = self.writer.lock().map_err(|_| Error::IndexUnavailable("sparse writer lock poisoned".into()))?;
		for id in deletes.iter().chain(adds.iter().map(|c| &c.chunk_id)) {
			writer.delete_term(Term::from_field_text(self.fields.chunk_id, id));
		}
		for c in adds {
			writer.add_document(self.to_document(c)).map_err(Error::index)?;
		}
		writer.commit().map_err(Error::index)?;
		self.reader.reload().map_err(Error::index)?;
		Ok(())
	}
}

pub struct TantivySparseIndex {
	root: Option<PathBuf>,
	collections: RwLock<HashMap<String, Arc<CollectionIndex>>>,
}

impl TantivySparseIndex {
	/// Collections kept entirely in memory.
	pub fn in_memory() -> Self {
		Self { root: None, collections: RwLock::new(HashMap::new()) }
	}

	/// Collections persisted under `root`, one directory each.
	pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
		let root = root.into();
		std::fs::create_dir_all(&root).map_err(Error::index)?;
		info!(root = %root.display(), "opened sparse index root");
		Ok(Self { root: Some(root), collections: RwLock::new(HashMap::new()) })
	}

	pub(crate) fn collection(&self, name: &str, create: bool) -> Result<Option<Arc<CollectionIndex>>> {
		validate_collection(name)?;
		{
			let map = self.collections.read().map_err(|_| Error::IndexUnavailable("sparse registry lock poisoned".into()))?;
			if let Some(c) = map.get(name) {
				return Ok(Some(c.clone()));
			}
		}
		let mut map = self.collections.write().map_err(|_| Error::IndexUnavailable("sparse registry lock poisoned".into()))?;
		if let Some(c) = map.get(name) {
			return Ok(Some(c.clone()));
		}
		let index = match &self.root {
			None if create => Index::create_in_ram(build_schema()),
			None => return Ok(None),
			Some(root) => {
				let dir = root.join(name);
				if !create && !dir.join("meta.json").exists() {
					return Ok(None);
				}
				std::fs::create_dir_all(&dir).map_err(Error::index)?;
				let mmap = MmapDirectory::open(&dir).map_err(Error::index)?;
				Index::open_or_create(mmap, build_schema()).map_err(Error::index)?
			}
		};
		debug!(collection = name, "opened sparse collection");
		let opened = Arc::new(CollectionIndex::open(index)?);
		map.insert(name.to_string(), opened.clone());
		Ok(Some(opened))
	}

	/// Live chunks in a collection (0 when it does not exist).
	pub fn num_chunks(&self, collection: &str) -> Result<u64> {
		Ok(self.collection(collection, false)?.map(|c| c.reader.searcher().num_docs()).unwrap_or(0))
	}
}

impl SparseIndex for TantivySparseIndex {
	fn index(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
		if chunks.is_empty() {
			return Ok(());
		}
		if let Some(c) = chunks.iter().find(|c| c.domain != collection) {
			return Err(Error::InvalidInput(format!("chunk {} belongs to '{}', not '{}'", c.chunk_id, c.domain, collection)));
		}
		let target = self.collection(collection, true)?.ok_or_else(|| Error::NotFound(collection.to_string()))?;
		target.write(&[], chunks)?;
		debug!(collection, chunks = chunks.len(), "indexed sparse chunks");
		Ok(())
	}

	fn remove(&self, collection: &str, chunk_ids: &[ChunkId]) -> Result<()> {
		if chunk_ids.is_empty() {
			return Ok(());
		}
		match self.collection(collection, false)? {
			Some(target) => target.write(chunk_ids, &[]),
			None => Ok(()),
		}
	}

	fn search(&self, collection: &str, query: &str, k: usize, filter: &AccessFilter) -> Result<Vec<SearchHit>> {
		match self.collection(collection, false)? {
			Some(target) => target.search(query, k, filter),
			None => Ok(Vec::new()),
		}
	}

	fn fetch(&self, collection: &str, chunk_ids: &[ChunkId]) -> Result<Vec<Chunk>> {
		match self.collection(collection, false)? {
			Some(target) => target.fetch(chunk_ids),
			None => Ok(Vec::new()),
		}
	}

	fn document_chunk_ids(&self, collection: &str, document_id: &str) -> Result<Vec<ChunkId>> {
		match self.collection(collection, false)? {
			Some(target) => target.document_chunk_ids(document_id),
			None => Ok(Vec::new()),
		}
	}
}
