//! # Grounded RAG CLI (`grag`)
//!
//! ## Usage
//!
//! ```bash
//! grag --config ./config/grag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grag init` | Create the SQLite database and run schema migrations |
//! | `grag ingest <dir>` | Extract, chunk, embed and store a document directory |
//! | `grag ask "<question>"` | Run one question through the guarded pipeline |
//! | `grag serve` | Start the HTTP query server |
//! | `grag bench <questions.jsonl>` | Report p50/p95 latency and estimated cost |
//!
//! ## Examples
//!
//! ```bash
//! grag init --config ./config/grag.toml
//! grag ingest ./corpus --config ./config/grag.toml
//! grag ask "How do I reset my VPN token?" --top-k 5
//! grag serve --config ./config/grag.toml
//! grag bench eval/questions.jsonl --requests 50 --concurrency 5
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use grounded_rag::bench;
use grounded_rag::config;
use grounded_rag::db;
use grounded_rag::ingest;
use grounded_rag::logging;
use grounded_rag::migrate;
use grounded_rag::pipeline::QueryPipeline;
use grounded_rag::server;
use grounded_rag::store::SqliteStore;

/// Grounded RAG CLI: question answering over a private corpus with
/// PII masking, topic refusal and citation verification.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/grag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "grag",
    about = "Guarded retrieval-augmented question answering over a private corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunks_fts). Safe to run repeatedly.
    Init,

    /// Ingest every supported file under a directory.
    ///
    /// Markdown, text, PDF and HTML files are chunked, embedded and
    /// stored. Files whose content is unchanged since the last run are
    /// skipped.
    Ingest {
        /// Corpus root; document ids are paths relative to it.
        dir: PathBuf,
    },

    /// Answer one question and print the response as JSON.
    Ask {
        question: String,

        /// Retrieval candidates per search channel.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Start the HTTP query server on `[server].bind`.
    Serve,

    /// Benchmark the pipeline over a JSONL question set.
    ///
    /// Each line is an object with a `question` field. Reports p50/p95
    /// latency and the summed cost estimate.
    Bench {
        questions: PathBuf,

        /// Total requests; defaults to one per question.
        #[arg(long)]
        requests: Option<usize>,

        /// Requests in flight at once.
        #[arg(long, default_value_t = 5)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dir } => {
            ingest::run_ingest(&cfg, &dir).await?;
        }
        Commands::Ask { question, top_k } => {
            let pool = db::connect(&cfg).await?;
            migrate::migrate(&pool).await?;
            let store = Arc::new(SqliteStore::new(pool.clone()));

            let pipeline = QueryPipeline::from_config(&cfg, store).await?;
            let result = pipeline.run(&question, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&result.response)?);

            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Bench {
            questions,
            requests,
            concurrency,
        } => {
            bench::run_bench_cmd(&cfg, &questions, requests, concurrency).await?;
        }
    }

    Ok(())
}
