//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! (chosen by `RUST_ENV`), `APP_*` env vars (nested keys split on `__`) and the
//! bare operator variables `CHUNK_SIZE`, `CHUNK_OVERLAP`, `TOP_K`,
//! `MIN_SCORE_THRESHOLD`, `FUSION_WEIGHTS` and `RERANK_TOP_N`.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};

const OPERATOR_ENV_KEYS: [&str; 6] =
    ["CHUNK_SIZE", "CHUNK_OVERLAP", "TOP_K", "MIN_SCORE_THRESHOLD", "FUSION_WEIGHTS", "RERANK_TOP_N"];

/// Hard ceiling on texts per embedding call.
pub const MAX_EMBED_BATCH: usize = 100;
/// No external call is retried more than this many times.
pub const MAX_RETRIES: usize = 2;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Ok(Self { figment: Self::figment_for_env(&env_name) })
    }

    pub fn figment_for_env(env_name: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment.merge(Env::prefixed("APP_").split("__")).merge(Env::raw().only(&OPERATOR_ENV_KEYS))
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    /// Typed, validated engine settings.
    pub fn engine(&self) -> Result<EngineConfig> {
        let config: EngineConfig = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Relative weight of each retriever during fusion.
///
/// Accepts a table (`{ dense = 0.6, sparse = 0.4 }`) or the operator string
/// form `"0.6/0.4"` (also `,` or `:` as separator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WeightsRepr")]
pub struct FusionWeights {
    pub dense: f32,
    pub sparse: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { dense: 0.5, sparse: 0.5 }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WeightsRepr {
    Pair(String),
    Table { dense: f32, sparse: f32 },
}

impl TryFrom<WeightsRepr> for FusionWeights {
    type Error = String;

    fn try_from(repr: WeightsRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            WeightsRepr::Table { dense, sparse } => Ok(Self { dense, sparse }),
            WeightsRepr::Pair(s) => {
                let parts: Vec<&str> = s.split(['/', ',', ':']).map(str::trim).collect();
                match parts.as_slice() {
                    [d, sp] => {
                        let dense = d.parse::<f32>().map_err(|e| format!("bad dense weight '{d}': {e}"))?;
                        let sparse = sp.parse::<f32>().map_err(|e| format!("bad sparse weight '{sp}': {e}"))?;
                        Ok(Self { dense, sparse })
                    }
                    _ => Err(format!("fusion weights must look like '0.5/0.5', got '{s}'")),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategyKind {
    Rrf,
    Weighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseBackend {
    Memory,
    Lance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Hashed,
    Local,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    None,
    TermOverlap,
    Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpanderKind {
    Rules,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimensions: usize,
    pub api_base: Option<String>,
    pub model_dir: Option<String>,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub backoff_ms: u64,
    pub cache_capacity: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hashed,
            model: "text-embedding-3-small".to_string(),
            dimensions: 384,
            api_base: None,
            model_dir: None,
            batch_size: MAX_EMBED_BATCH,
            timeout_ms: 15_000,
            max_retries: MAX_RETRIES,
            backoff_ms: 200,
            cache_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub api_base: Option<String>,
    pub timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self { model: "gpt-4o-mini".to_string(), api_base: None, timeout_ms: 20_000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub default_collection: Option<String>,
    /// collection -> keywords that route a query to it
    pub rules: BTreeMap<String, Vec<String>>,
    pub use_model: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    /// Minimum dense similarity a vector hit needs. Calibrate per embedding
    /// model with `citerag calibrate`.
    pub min_score_threshold: f32,
    pub fusion_weights: FusionWeights,
    pub fusion_strategy: FusionStrategyKind,
    pub rrf_k: f32,
    pub rerank_top_n: usize,
    pub reranker: RerankerKind,
    pub rerank_timeout_ms: u64,
    pub expander: ExpanderKind,
    pub max_expansions: usize,
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub data_dir: Option<String>,
    pub dense_backend: DenseBackend,
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
    pub routing: RoutingSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            chunk_overlap: 80,
            top_k: 6,
            min_score_threshold: 0.25,
            fusion_weights: FusionWeights::default(),
            fusion_strategy: FusionStrategyKind::Rrf,
            rrf_k: 60.0,
            rerank_top_n: 15,
            reranker: RerankerKind::TermOverlap,
            rerank_timeout_ms: 10_000,
            expander: ExpanderKind::Rules,
            max_expansions: 3,
            synonyms: default_synonyms(),
            data_dir: None,
            dense_backend: DenseBackend::Memory,
            embedding: EmbeddingSettings::default(),
            llm: LlmSettings::default(),
            routing: RoutingSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig { chunk_size: self.chunk_size, overlap: self.chunk_overlap }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking().validate()?;
        if self.top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be greater than zero".into()));
        }
        if !self.min_score_threshold.is_finite() {
            return Err(Error::InvalidConfig("min_score_threshold must be finite".into()));
        }
        let FusionWeights { dense, sparse } = self.fusion_weights;
        if !(dense.is_finite() && sparse.is_finite()) || dense < 0.0 || sparse < 0.0 || dense + sparse <= 0.0 {
            return Err(Error::InvalidConfig(format!("fusion weights {dense}/{sparse} must be non-negative and not both zero")));
        }
        if !(self.rrf_k.is_finite() && self.rrf_k > 0.0) {
            return Err(Error::InvalidConfig("rrf_k must be positive".into()));
        }
        if self.max_expansions == 0 {
            return Err(Error::InvalidConfig("max_expansions must be at least 1".into()));
        }
        let e = &self.embedding;
        if e.batch_size == 0 || e.batch_size > MAX_EMBED_BATCH {
            return Err(Error::InvalidConfig(format!("embedding.batch_size must be within 1..={MAX_EMBED_BATCH}")));
        }
        if e.max_retries > MAX_RETRIES {
            return Err(Error::InvalidConfig(format!("embedding.max_retries must not exceed {MAX_RETRIES}")));
        }
        if e.dimensions == 0 {
            return Err(Error::InvalidConfig("embedding.dimensions must be greater than zero".into()));
        }
        if self.dense_backend == DenseBackend::Lance && self.data_dir.is_none() {
            return Err(Error::InvalidConfig("dense_backend = \"lance\" requires data_dir".into()));
        }
        Ok(())
    }

    pub fn data_path(&self) -> Option<PathBuf> { self.data_dir.as_deref().map(expand_path) }
}

fn default_synonyms() -> BTreeMap<String, Vec<String>> {
    [
        ("vacation", &["leave", "time off", "pto"][..]),
        ("salary", &["pay", "compensation"][..]),
        ("password", &["credentials", "login"][..]),
        ("error", &["failure", "fault"][..]),
        ("refund", &["reimbursement", "return"][..]),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
    .collect()
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
