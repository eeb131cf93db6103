//! citerag-hybrid
//!
//! Query-time pipeline over the dense and sparse indexes: collection routing,
//! query expansion, score fusion, reranking and citation mapping, plus the
//! answer guard and threshold calibration built on top of it.
pub mod calibrate;
pub mod citation;
pub mod engine;
pub mod expand;
pub mod fusion;
pub mod llm;
pub mod rerank;
pub mod selector;

pub use calibrate::{calibrate, CalibrationReport, LabeledQuery, ScoreSummary};
pub use citation::{map_citations, validate_answer, AnswerGenerator, AnswerGuard, AnswerOutcome, ChatAnswerGenerator, GuardedAnswer};
pub use engine::{EngineBuilder, RetrievalEngine, RetrievalOutcome, RetrievalResponse, RetrievalState};
pub use expand::{LlmQueryExpander, QueryExpander, RuleBasedExpander};
pub use fusion::{fuse, FusedHit, FusionStrategy};
pub use llm::{ChatModel, OpenAiChat};
pub use rerank::{apply_rerank, LlmReranker, Reranker, TermOverlapReranker};
pub use selector::{CollectionDecision, DecisionMethod, KeywordSelector, LlmSelector, RoutingSelector};
