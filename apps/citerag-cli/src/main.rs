//! citerag command line: ingest a directory of text files, query a collection,
//! answer with validated citations, or calibrate the dense score threshold.
//!
//! Configuration comes from `config.toml` / `config.<RUST_ENV>.toml` and
//! environment overrides; see `citerag_core::config`.
mod output;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use citerag_core::chunker::DirectoryLoader;
use citerag_core::config::{Config, EngineConfig};
use citerag_core::types::Query;
use citerag_hybrid::calibrate::{calibrate, LabeledQuery};
use citerag_hybrid::{AnswerGuard, ChatAnswerGenerator, OpenAiChat, RetrievalEngine};

#[derive(Parser)]
#[command(name = "citerag", version, about = "Hybrid retrieval with citations")]
struct Cli {
    /// Override `data_dir` from the configuration
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Enable verbose logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index every .txt/.md file under a directory
    Ingest {
        dir: PathBuf,
        #[arg(short, long)]
        collection: String,
        /// Roles allowed to read the documents (repeatable); none means public
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Retrieve cited chunks for a question
    Query {
        text: String,
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(long)]
        role: Option<String>,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retrieve, then generate an answer whose paragraphs must cite the hits
    Answer {
        text: String,
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Suggest `min_score_threshold` from a JSONL file of labeled queries
    Calibrate { labeled: PathBuf },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn load_config(data_dir: Option<String>) -> Result<EngineConfig> {
    let mut config = Config::load()?.engine().context("invalid configuration")?;
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }
    config.validate()?;
    Ok(config)
}

fn build_query(engine: &RetrievalEngine, text: String, collection: Option<String>, role: Option<String>) -> Query {
    let mut query = engine.query(text);
    query.collection = collection;
    query.role = role;
    query
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.data_dir)?;
    if config.data_dir.is_none() {
        warn!("no data_dir configured; indexes live in memory for this run only");
    }
    let llm = config.llm.clone();
    let engine = RetrievalEngine::open(config).await.context("opening retrieval engine")?;

    match cli.command {
        Command::Ingest { dir, collection, roles } => {
            let roles: BTreeSet<String> = roles.into_iter().collect();
            let documents = DirectoryLoader::new(collection.clone(), roles).load(&dir)?;
            let pb = ProgressBar::new(documents.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents ({percent}%) {msg}")?
                    .progress_chars("#>-"),
            );
            let (mut chunks, mut embedded, mut failed) = (0usize, 0usize, Vec::new());
            for doc in &documents {
                pb.set_message(doc.document_id.clone());
                let report = engine.ingest(doc).await.with_context(|| format!("ingesting {}", doc.document_id))?;
                chunks += report.chunks_created;
                embedded += report.embeddings_created;
                failed.extend(report.failed_chunk_ids);
                pb.inc(1);
            }
            pb.finish_with_message("done");
            println!("Ingested {} documents into '{collection}': {chunks} chunks, {embedded} embeddings", documents.len());
            if !failed.is_empty() {
                println!("{} chunks failed to embed and were not indexed:", failed.len());
                for id in failed {
                    println!("  {id}");
                }
            }
        }
        Command::Query { text, collection, role, top_k, min_score, json } => {
            let mut query = build_query(&engine, text, collection, role);
            if let Some(k) = top_k {
                query.top_k = k;
            }
            if let Some(m) = min_score {
                query.min_score = m;
            }
            let response = engine.retrieve(query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", output::format_response(&response));
            }
        }
        Command::Answer { text, collection, role } => {
            let query = build_query(&engine, text.clone(), collection, role);
            let response = engine.retrieve(query).await?;
            let guard = AnswerGuard::new(Arc::new(ChatAnswerGenerator::new(Arc::new(OpenAiChat::new(&llm)))));
            let answer = guard.answer(&text, &response).await?;
            println!("{}", output::format_answer(&answer, &response));
        }
        Command::Calibrate { labeled } => {
            let raw = std::fs::read_to_string(&labeled).with_context(|| format!("reading {}", labeled.display()))?;
            let queries = raw
                .lines()
                .filter(|l| !l.trim().is_empty())
                .enumerate()
                .map(|(i, l)| serde_json::from_str::<LabeledQuery>(l).with_context(|| format!("line {}", i + 1)))
                .collect::<Result<Vec<_>>>()?;
            let report = calibrate(&engine, &queries).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
