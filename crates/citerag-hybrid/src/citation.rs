//! Citation ids for final hits, answer validation, and the answer guard that
//! enforces them.
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use citerag_core::error::{Error, Result};
use citerag_core::types::{Citation, RetrievalHit};

use crate::engine::RetrievalResponse;
use crate::llm::ChatModel;

pub const CITATION_PREFIX: &str = "CIT-";
pub const NO_KB_HIT_ANSWER: &str = "I could not find this in the knowledge base.";
pub const NEEDS_MORE_INFO_ANSWER: &str = "I need more information to answer this from the knowledge base.";

/// `CIT-1..CIT-n` in rank order.
pub fn map_citations(hits: &[RetrievalHit], collection: &str) -> Vec<Citation> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| Citation {
            cit_id: format!("{CITATION_PREFIX}{}", i + 1),
            chunk_id: hit.chunk_id.clone(),
            document_id: hit.document_id.clone(),
            score: hit.final_score(),
            source_collection: collection.to_string(),
        })
        .collect()
}

/// Every `CIT-<digits>` token in `text`, in order of appearance.
pub fn citation_tokens(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    let mut offset = 0;
    while let Some(pos) = rest.find(CITATION_PREFIX) {
        let start = offset + pos;
        let digits_from = start + CITATION_PREFIX.len();
        let digits = text[digits_from..].bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            out.push(&text[start..digits_from + digits]);
        }
        offset = digits_from + digits;
        rest = &text[offset..];
    }
    out
}

/// Blocks of text separated by blank (empty or whitespace-only) lines.
pub fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

/// Reject answers that cite unknown ids, or that leave a paragraph uncited
/// while the knowledge base returned hits.
pub fn validate_answer(answer: &str, citations: &[Citation], retrieved_k: usize) -> Result<()> {
    let known: HashSet<&str> = citations.iter().map(|c| c.cit_id.as_str()).collect();
    if let Some(unknown) = citation_tokens(answer).into_iter().find(|t| !known.contains(t)) {
        return Err(Error::ValidationFailure(format!("unknown citation {unknown}")));
    }
    if retrieved_k == 0 {
        return Ok(());
    }
    let blocks = paragraphs(answer);
    if blocks.is_empty() {
        return Err(Error::ValidationFailure("empty answer".into()));
    }
    if let Some((i, _)) = blocks.iter().enumerate().find(|(_, p)| citation_tokens(p).is_empty()) {
        return Err(Error::ValidationFailure(format!("paragraph {} has no citation", i + 1)));
    }
    Ok(())
}

/// Produces answer text from retrieved hits.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// `correction` carries the validation error of a previous attempt.
    async fn generate(&self, question: &str, hits: &[RetrievalHit], citations: &[Citation], correction: Option<&str>) -> Result<String>;
}

const ANSWER_SYSTEM: &str = "Answer using only the numbered sources. \
End every paragraph with the citation ids it relies on, e.g. [CIT-1]. \
Only use citation ids that appear in the sources. If the sources do not answer the question, say so.";

pub struct ChatAnswerGenerator {
    chat: Arc<dyn ChatModel>,
}

impl ChatAnswerGenerator {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self { Self { chat } }
}

#[async_trait]
impl AnswerGenerator for ChatAnswerGenerator {
    async fn generate(&self, question: &str, hits: &[RetrievalHit], citations: &[Citation], correction: Option<&str>) -> Result<String> {
        let mut prompt = String::from("Sources:\n");
        for (hit, cit) in hits.iter().zip(citations) {
            prompt.push_str(&format!("[{}] ({}) {}\n\n", cit.cit_id, hit.document_id, hit.text.trim()));
        }
        prompt.push_str(&format!("Question: {question}\n"));
        if let Some(problem) = correction {
            prompt.push_str(&format!(
                "\nYour previous answer was rejected: {problem}. Cite every paragraph with ids from the sources only.\n"
            ));
        }
        self.chat.complete(ANSWER_SYSTEM, &prompt).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Cited,
    NoKbHit,
    NeedsMoreInformation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub outcome: AnswerOutcome,
    /// Generator calls made (0 for the no-hit answer).
    pub attempts: usize,
}

/// Generates, validates, retries once with a correction, then falls back.
pub struct AnswerGuard {
    generator: Arc<dyn AnswerGenerator>,
}

impl AnswerGuard {
    const MAX_ATTEMPTS: usize = 2;

    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self { Self { generator } }

    pub async fn answer(&self, question: &str, retrieval: &RetrievalResponse) -> Result<GuardedAnswer> {
        if retrieval.retrieved_k == 0 {
            return Ok(GuardedAnswer { text: NO_KB_HIT_ANSWER.into(), citations: Vec::new(), outcome: AnswerOutcome::NoKbHit, attempts: 0 });
        }
        let mut correction: Option<String> = None;
        for attempt in 1..=Self::MAX_ATTEMPTS {
            let text = self.generator.generate(question, &retrieval.hits, &retrieval.citations, correction.as_deref()).await?;
            match validate_answer(&text, &retrieval.citations, retrieval.retrieved_k) {
                Ok(()) => {
                    info!(attempt, "answer passed citation validation");
                    return Ok(GuardedAnswer { text, citations: retrieval.citations.clone(), outcome: AnswerOutcome::Cited, attempts: attempt });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "answer failed citation validation");
                    correction = Some(e.to_string());
                }
            }
        }
        Ok(GuardedAnswer {
            text: NEEDS_MORE_INFO_ANSWER.into(),
            citations: Vec::new(),
            outcome: AnswerOutcome::NeedsMoreInformation,
            attempts: Self::MAX_ATTEMPTS,
        })
    }
}
