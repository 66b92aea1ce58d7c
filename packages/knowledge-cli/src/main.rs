//! Evaluation CLI for the knowledge engine.
//!
//! `evaluate` replays a labeled dataset against the persisted indexes and
//! writes JSON + Markdown reports, optionally failing the process on a
//! regression against a stored baseline. `init-test-db` seeds both
//! indexes from a fixture file without touching the network.

mod evaluate;
mod fixture;
mod setup;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "knowledge")]
#[command(about = "Retrieval evaluation for the knowledge engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate retrieval quality against a labeled dataset
    Evaluate(EvaluateArgs),

    /// Build test indexes from a fixture document file
    InitTestDb(InitTestDbArgs),
}

/// Retrieval parameters shared by both subcommands.
#[derive(Args, Debug, Clone)]
struct RetrievalArgs {
    /// Vector store persistence directory
    #[arg(long)]
    persist_dir: PathBuf,

    /// BM25 index persistence directory
    #[arg(long)]
    bm25_persist_dir: PathBuf,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = 200)]
    chunk_size: usize,

    /// Overlap characters between chunks
    #[arg(long, default_value_t = 30)]
    chunk_overlap: usize,

    /// BM25 term-frequency saturation (k1 > 0)
    #[arg(long, default_value_t = 2.5)]
    bm25_k1: f32,

    /// BM25 length normalization (0 <= b <= 1)
    #[arg(long, default_value_t = 0.5)]
    bm25_b: f32,

    /// OpenAI-compatible embeddings endpoint; omit for the offline
    /// deterministic embedder
    #[arg(long)]
    embedding_endpoint: Option<String>,

    /// Embedding model name
    #[arg(long, default_value = "nomic-embed-text")]
    embedding_model: String,

    /// API key for the embeddings endpoint
    #[arg(long, default_value = "")]
    embedding_api_key: String,

    /// Prepend search_document:/search_query: task prefixes
    #[arg(long)]
    embedding_prefix: bool,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    retrieval: RetrievalArgs,

    /// Evaluation dataset path
    #[arg(long, default_value = "tests/fixtures/rag_evaluation_dataset.json")]
    dataset: PathBuf,

    /// Report output directory
    #[arg(long, default_value = ".tmp/rag-evaluation")]
    output_dir: PathBuf,

    /// Baseline JSON report to compare against
    #[arg(long)]
    baseline_file: Option<PathBuf>,

    /// Results fetched per query
    #[arg(long, default_value_t = 5)]
    n_results: usize,

    /// Vector-distance similarity threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Fusion weight α for the vector side (0.0..=1.0)
    #[arg(long, default_value_t = 0.9)]
    vector_weight: f32,

    /// Enable hybrid (vector + BM25) retrieval
    #[arg(long)]
    hybrid: bool,

    /// Post-fusion combined-score cutoff
    #[arg(long)]
    min_combined_score: Option<f32>,

    /// Exit with code 1 when a regression is detected
    #[arg(long)]
    fail_on_regression: bool,

    /// F1 drop that counts as a regression
    #[arg(long, default_value_t = 0.1)]
    regression_threshold: f64,

    /// Save this run as baseline.json in the output directory
    #[arg(long)]
    save_baseline: bool,
}

#[derive(Args, Debug)]
struct InitTestDbArgs {
    #[command(flatten)]
    retrieval: RetrievalArgs,

    /// Fixture document file ({"documents": [{url, title, text}]})
    #[arg(long, default_value = "tests/fixtures/rag_test_documents.json")]
    fixture: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Evaluate(args) => evaluate::run(args).await,
        Commands::InitTestDb(args) => fixture::init_test_db(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
