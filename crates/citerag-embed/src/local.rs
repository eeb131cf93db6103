//! Local BGE-M3 embeddings through candle.
//!
//! Weights are read from `<model_dir>/{tokenizer.json,config.json,pytorch_model.bin}`.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use citerag_core::error::{Error, Result};
use citerag_core::traits::EmbeddingProvider;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

const MAX_LEN: usize = 512;
const DIM: usize = 1024;

struct LoadedModel {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LoadedModel {
    fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros(input_ids.dims(), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        let elapsed = start.elapsed();
        if elapsed.as_millis() as usize > 100 * texts.len() {
            warn!(batch = texts.len(), ms = elapsed.as_millis() as u64, "slow local embedding batch");
        }
        Ok(rows)
    }
}

/// BGE-M3 (1024-d, mean pooled) running on metal when available, else CPU.
#[derive(Clone)]
pub struct BgeM3Embedder {
    inner: Arc<LoadedModel>,
    id: String,
}

impl BgeM3Embedder {
    pub fn load(model_dir: &Path) -> AnyResult<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading BGE-M3");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("BGE-M3 loaded");
        Ok(Self { inner: Arc::new(LoadedModel { model, tokenizer, device }), id: "bge-m3".to_string() })
    }
}

#[async_trait]
impl EmbeddingProvider for BgeM3Embedder {
    fn model_id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { DIM }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inner = self.inner.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.embed_batch(&texts))
            .await
            .map_err(Error::embedding)?
            .map_err(Error::embedding)
    }
}

/// First existing directory among the configured one, `APP_MODEL_DIR`,
/// `MODEL_DIR` and `models/bge-m3`.
pub fn resolve_model_dir(configured: Option<&Path>) -> AnyResult<PathBuf> {
    let env_dirs = ["APP_MODEL_DIR", "MODEL_DIR"].into_iter().filter_map(|k| std::env::var(k).ok()).map(PathBuf::from);
    configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(env_dirs)
        .chain([PathBuf::from("models/bge-m3"), PathBuf::from("../models/bge-m3")])
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Could not locate BGE-M3 model directory"))
}
