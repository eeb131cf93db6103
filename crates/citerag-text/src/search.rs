use std::collections::HashMap;

use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{DocAddress, Searcher, TantivyDocument, Term};

use citerag_core::error::{Error, Result};
use citerag_core::types::{AccessFilter, Chunk, ChunkId, Roles, SearchHit, SourceKind};

use crate::index::CollectionIndex;
use crate::tantivy_utils::{analyze, PUBLIC_ROLE};

impl CollectionIndex {
	/// BM25 over the analyzed query terms, restricted to chunks `filter` may read.
	pub(crate) fn search(&self, query_text: &str, k: usize, filter: &AccessFilter) -> Result<Vec<SearchHit>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		let terms = analyze(&self.index, self.fields.text, query_text)?;
		if terms.is_empty() {
			return Ok(Vec::new());
		}
		let should: Vec<(Occur, Box<dyn Query>)> = terms
			.iter()
			.map(|t| {
				let q: Box<dyn Query> = Box::new(TermQuery::new(Term::from_field_text(self.fields.text, t), IndexRecordOption::WithFreqs));
				(Occur::Should, q)
			})
			.collect();
		let query = BooleanQuery::new(vec![
			(Occur::Must, Box::new(BooleanQuery::new(should)) as Box<dyn Query>),
			(Occur::Must, self.access_query(filter)),
		]);

		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&query, &TopDocs::with_limit(k)).map_err(Error::index)?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(Error::index)?;
			if !filter.permits(&self.roles_of(&doc)) || score <= 0.0 {
				continue;
			}
			if let Some(id) = doc.get_first(self.fields.chunk_id).and_then(|v| v.as_str()) {
				hits.push(SearchHit { id: id.to_string(), score, source: SourceKind::Sparse });
			}
		}
		Ok(hits)
	}

	/// Zero-scoring clause matching public chunks plus those of the caller's role.
	fn access_query(&self, filter: &AccessFilter) -> Box<dyn Query> {
		let term_query = |role: &str| -> Box<dyn Query> {
			Box::new(TermQuery::new(Term::from_field_text(self.fields.roles, role), IndexRecordOption::Basic))
		};
		let mut allowed = vec![(Occur::Should, term_query(PUBLIC_ROLE))];
		if let Some(role) = &filter.role {
			allowed.push((Occur::Should, term_query(role)));
		}
		Box::new(ConstScoreQuery::new(Box::new(BooleanQuery::new(allowed)), 0.0))
	}

	fn roles_of(&self, doc: &TantivyDocument) -> Roles {
		doc.get_all(self.fields.roles)
			.filter_map(|v| v.as_str())
			.filter(|r| *r != PUBLIC_ROLE)
			.map(str::to_string)
			.collect()
	}

	fn to_chunk(&self, doc: &TantivyDocument) -> Option<Chunk> {
		let f = &self.fields;
		let text = |field: Field| doc.get_first(field).and_then(|v| v.as_str()).map(str::to_string);
		let num = |field: Field| doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
		Some(Chunk {
			chunk_id: text(f.chunk_id)?,
			document_id: text(f.document_id)?,
			title: text(f.title).unwrap_or_default(),
			index: num(f.chunk_index),
			text: text(f.text)?,
			token_count: num(f.token_count),
			domain: text(f.domain).unwrap_or_default(),
			access_roles: self.roles_of(doc),
			start: num(f.start),
			end: num(f.end),
		})
	}

	fn addresses_for(&self, searcher: &Searcher, field: Field, value: &str) -> Result<Vec<DocAddress>> {
		let q = TermQuery::new(Term::from_field_text(field, value), IndexRecordOption::Basic);
		let mut found: Vec<DocAddress> = searcher.search(&q, &DocSetCollector).map_err(Error::index)?.into_iter().collect();
		found.sort();
		Ok(found)
	}

	/// Chunks for `ids`, in the order requested. Unknown ids are skipped.
	pub(crate) fn fetch(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
		let searcher = self.reader.searcher();
		let mut by_id: HashMap<&str, Chunk> = HashMap::new();
		for id in ids {
			if let Some(addr) = self.addresses_for(&searcher, self.fields.chunk_id, id)?.into_iter().next() {
				let doc: TantivyDocument = searcher.doc(addr).map_err(Error::index)?;
				if let Some(chunk) = self.to_chunk(&doc) {
					by_id.insert(id.as_str(), chunk);
				}
			}
		}
		Ok(ids.iter().filter_map(|id| by_id.remove(id.as_str())).collect())
	}

	pub(crate) fn document_chunk_ids(&self, document_id: &str) -> Result<Vec<ChunkId>> {
		let searcher = self.reader.searcher();
		let mut ids = Vec::new();
		for addr in self.addresses_for(&searcher, self.fields.document_id, document_id)? {
			let doc: TantivyDocument = searcher.doc(addr).map_err(Error::index)?;
			if let Some(id) = doc.get_first(self.fields.chunk_id).and_then(|v| v.as_str()) {
				ids.push(id.to_string());
			}
		}
		ids.sort();
		Ok(ids)
	}
}
