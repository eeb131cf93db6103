//! Query expansion: a few alternative phrasings searched alongside the
//! original question.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use citerag_core::text::keywords;

use crate::llm::{parse_json_reply, ChatModel};

#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// The original query first, then alternatives. Never fails; the worst
    /// case is the original query alone.
    async fn expand(&self, raw_query: &str) -> Vec<String>;
}

/// Keep the first occurrence of each query (case-insensitive), up to `max`.
pub fn dedup_queries<I: IntoIterator<Item = String>>(queries: I, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .map(|q| q.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
        .take(max.max(1))
        .collect()
}

pub struct RuleBasedExpander {
    synonyms: BTreeMap<String, Vec<String>>,
    max_expansions: usize,
}

impl RuleBasedExpander {
    pub fn new(synonyms: BTreeMap<String, Vec<String>>, max_expansions: usize) -> Self {
        let synonyms = synonyms.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
        Self { synonyms, max_expansions }
    }

    pub fn expand_now(&self, raw_query: &str) -> Vec<String> {
        let raw = raw_query.trim();
        let terms = keywords(raw);
        let mut candidates = vec![raw.to_string()];
        if !terms.is_empty() {
            candidates.push(terms.join(" "));
        }
        for (i, term) in terms.iter().enumerate() {
            for alt in self.synonyms.get(term).into_iter().flatten() {
                let mut replaced = terms.clone();
                replaced[i] = alt.clone();
                candidates.push(replaced.join(" "));
            }
        }
        dedup_queries(candidates, self.max_expansions)
    }
}

#[async_trait]
impl QueryExpander for RuleBasedExpander {
    async fn expand(&self, raw_query: &str) -> Vec<String> { self.expand_now(raw_query) }
}

#[derive(Deserialize)]
struct Rephrasings {
    queries: Vec<String>,
}

const EXPAND_SYSTEM: &str = "You rewrite search queries for a document retrieval system. \
Reply with JSON only: {\"queries\": [\"...\"]}. Give up to two short alternative phrasings \
that use vocabulary a policy or manual would use. Do not answer the question.";

pub struct LlmQueryExpander {
    chat: Arc<dyn ChatModel>,
    fallback: RuleBasedExpander,
    max_expansions: usize,
}

impl LlmQueryExpander {
    pub fn new(chat: Arc<dyn ChatModel>, fallback: RuleBasedExpander, max_expansions: usize) -> Self {
        Self { chat, fallback, max_expansions }
    }
}

#[async_trait]
impl QueryExpander for LlmQueryExpander {
    async fn expand(&self, raw_query: &str) -> Vec<String> {
        let reply = match self.chat.complete(EXPAND_SYSTEM, raw_query).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "query expansion model failed; using rules");
                return self.fallback.expand_now(raw_query);
            }
        };
        match parse_json_reply::<Rephrasings>(&reply) {
            Ok(parsed) if !parsed.queries.is_empty() => {
                let out = dedup_queries(std::iter::once(raw_query.trim().to_string()).chain(parsed.queries), self.max_expansions);
                debug!(?out, "model expansions");
                out
            }
            Ok(_) => self.fallback.expand_now(raw_query),
            Err(e) => {
                warn!(error = %e, "unparseable expansion reply; using rules");
                self.fallback.expand_now(raw_query)
            }
        }
    }
}
