use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The embedding provider failed after all retries (or timed out).
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The storage backend behind a dense or sparse index is unreachable.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Collection '{collection}' is embedded with '{expected}', refusing vectors from '{actual}'")]
    ModelMismatch { collection: String, expected: String, actual: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Rerank failure: {0}")]
    RerankFailure(String),

    #[error("Citation validation failed: {0}")]
    ValidationFailure(String),

    #[error("Language model call failed: {0}")]
    Llm(String),

    /// A broken internal invariant, e.g. an illegal retrieval state transition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn index<E: std::fmt::Display>(err: E) -> Self { Self::IndexUnavailable(err.to_string()) }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self { Self::EmbeddingUnavailable(err.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;
