use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

use citerag_core::error::{Error, Result};
use citerag_core::text::STOP_WORDS;

pub const ANALYZER: &str = "citerag_en";
/// Stored in the roles field of chunks readable without a role.
pub const PUBLIC_ROLE: &str = "__public__";

#[derive(Debug, Clone, Copy)]
pub struct Fields {
	pub chunk_id: Field,
	pub document_id: Field,
	pub title: Field,
	pub domain: Field,
	pub text: Field,
	pub roles: Field,
	pub chunk_index: Field,
	pub token_count: Field,
	pub start: Field,
	pub end: Field,
}

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("chunk_id", STRING | STORED);
	schema_builder.add_text_field("document_id", STRING | STORED);
	schema_builder.add_text_field("title", STORED);
	schema_builder.add_text_field("domain", STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(ANALYZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field("text", text_options);
	schema_builder.add_text_field("roles", STRING | STORED);
	schema_builder.add_u64_field("chunk_index", STORED);
	schema_builder.add_u64_field("token_count", STORED);
	schema_builder.add_u64_field("start", STORED);
	schema_builder.add_u64_field("end", STORED);
	schema_builder.build()
}

pub fn fields(schema: &Schema) -> Result<Fields> {
	let get = |name: &str| schema.get_field(name).map_err(Error::index);
	Ok(Fields {
		chunk_id: get("chunk_id")?,
		document_id: get("document_id")?,
		title: get("title")?,
		domain: get("domain")?,
		text: get("text")?,
		roles: get("roles")?,
		chunk_index: get("chunk_index")?,
		token_count: get("token_count")?,
		start: get("start")?,
		end: get("end")?,
	})
}

pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(40))
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
		.filter(Stemmer::new(Language::English))
		.build();
	index.tokenizers().register(ANALYZER, tokenizer);
}

/// Run `text` through the index analyzer, returning unique terms in order.
pub fn analyze(index: &Index, field: Field, text: &str) -> Result<Vec<String>> {
	let mut analyzer = index.tokenizer_for_field(field).map_err(Error::index)?;
	let mut stream = analyzer.token_stream(text);
	let mut out: Vec<String> = Vec::new();
	while stream.advance() {
		let term = &stream.token().text;
		if !out.iter().any(|t| t == term) {
			out.push(term.clone());
		}
	}
	Ok(out)
}
