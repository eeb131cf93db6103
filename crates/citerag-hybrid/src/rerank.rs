//! Second-pass relevance scoring over the head of the fused list.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use citerag_core::error::{Error, Result};
use citerag_core::text::keywords;
use citerag_core::types::RetrievalHit;

use crate::llm::{parse_json_reply, ChatModel};

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    /// One relevance score in [0,1] per candidate, aligned with `candidates`.
    async fn rerank(&self, query: &str, candidates: &[RetrievalHit]) -> Result<Vec<f32>>;
}

/// Local reranker: `0.7 * fused + 0.3 * share of query keywords in the chunk`.
#[derive(Debug, Default, Clone)]
pub struct TermOverlapReranker;

#[async_trait]
impl Reranker for TermOverlapReranker {
    fn name(&self) -> &str { "term_overlap" }

    async fn rerank(&self, query: &str, candidates: &[RetrievalHit]) -> Result<Vec<f32>> {
        let query_terms: HashSet<String> = keywords(query).into_iter().collect();
        Ok(candidates
            .iter()
            .map(|hit| {
                let coverage = if query_terms.is_empty() {
                    0.0
                } else {
                    let chunk_terms: HashSet<String> = keywords(&hit.text).into_iter().collect();
                    query_terms.intersection(&chunk_terms).count() as f32 / query_terms.len() as f32
                };
                0.7 * hit.fused_score + 0.3 * coverage
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct RerankReply {
    scores: Vec<f32>,
}

const RERANK_SYSTEM: &str = "You judge how well passages answer a question. \
Reply with JSON only: {\"scores\": [..]} holding one number between 0 and 1 per passage, \
in the order given. 1 means the passage directly answers the question.";

/// Chat-model reranker; expects `{"scores": [..]}` aligned with the passages.
pub struct LlmReranker {
    chat: Arc<dyn ChatModel>,
    max_passage_chars: usize,
}

impl LlmReranker {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self { Self { chat, max_passage_chars: 1_200 } }

    fn prompt(&self, query: &str, candidates: &[RetrievalHit]) -> String {
        let mut prompt = format!("Question: {query}\n\nPassages:\n");
        for (i, hit) in candidates.iter().enumerate() {
            let text: String = hit.text.chars().take(self.max_passage_chars).collect();
            prompt.push_str(&format!("[{}] {}\n\n", i + 1, text.trim()));
        }
        prompt
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    fn name(&self) -> &str { "llm" }

    async fn rerank(&self, query: &str, candidates: &[RetrievalHit]) -> Result<Vec<f32>> {
        let reply = self.chat.complete(RERANK_SYSTEM, &self.prompt(query, candidates)).await.map_err(|e| Error::RerankFailure(e.to_string()))?;
        let parsed: RerankReply = parse_json_reply(&reply).map_err(|e| Error::RerankFailure(e.to_string()))?;
        Ok(parsed.scores)
    }
}

/// Rerank the first `top_n` hits under `timeout`. On failure, a timeout or a
/// malformed score list the input order is returned unchanged. Hits past
/// `top_n` keep their fusion order after the reranked head.
///
/// Returns whether rerank scores were applied.
pub async fn apply_rerank(
    reranker: &dyn Reranker,
    query: &str,
    mut hits: Vec<RetrievalHit>,
    top_n: usize,
    timeout: Duration,
) -> (Vec<RetrievalHit>, bool) {
    let n = top_n.min(hits.len());
    if n == 0 {
        return (hits, false);
    }
    let scores = match tokio::time::timeout(timeout, reranker.rerank(query, &hits[..n])).await {
        Ok(Ok(scores)) => scores,
        Ok(Err(e)) => {
            warn!(reranker = reranker.name(), error = %e, "rerank failed; keeping fusion order");
            return (hits, false);
        }
        Err(_) => {
            warn!(reranker = reranker.name(), ?timeout, "rerank timed out; keeping fusion order");
            return (hits, false);
        }
    };
    if scores.len() != n || scores.iter().any(|s| !s.is_finite()) {
        warn!(reranker = reranker.name(), expected = n, got = scores.len(), "malformed rerank scores; keeping fusion order");
        return (hits, false);
    }
    for (hit, score) in hits.iter_mut().zip(scores) {
        hit.rerank_score = Some(score.clamp(0.0, 1.0));
    }
    // stable: equal rerank scores keep fusion order
    hits[..n].sort_by(|a, b| b.rerank_score.unwrap_or(0.0).total_cmp(&a.rerank_score.unwrap_or(0.0)));
    debug!(reranker = reranker.name(), reranked = n, "rerank applied");
    (hits, true)
}
