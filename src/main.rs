//! # Lectern CLI (`lectern`)
//!
//! Processes documents through extraction, indexing and speech synthesis,
//! and serves the results over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! lectern --config ./config/lectern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectern init` | Create the SQLite database and run schema migrations |
//! | `lectern add <source>` | Register a document and process it to completion |
//! | `lectern list` | List documents with per-stage status |
//! | `lectern status <id>` | Show one document in detail |
//! | `lectern retry <id> <stage>` | Re-run a failed stage |
//! | `lectern chunks <id>` | List generated speech chunks |
//! | `lectern search <id> "<query>"` | Search one document's index |
//! | `lectern ask <id> "<question>"` | Ask a question about a document |
//! | `lectern serve` | Start the HTTP API |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lectern::chat::ChatService;
use lectern::config::{self, Config};
use lectern::extract::guess_content_type;
use lectern::pipeline::Pipeline;
use lectern::server::{self, default_title};
use lectern::sqlite_store::SqliteStore;
use lectern::{db, migrate};
use lectern_core::models::{Document, NewDocument, Stage};
use lectern_core::store::{StageClaim, Store};

/// Lectern: turn documents into searchable text and streamable audio.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lectern.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern: document extraction, indexing and speech synthesis pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Register a document and process it until every stage settles.
    Add {
        /// Source reference handed to the extraction service (URL or path).
        source: String,

        /// Document title. Defaults to the last path segment of the source.
        #[arg(long)]
        title: Option<String>,

        /// Content type. Guessed from the file extension when omitted.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// List documents, newest first.
    List,

    /// Show a document's stages and errors.
    Status { id: String },

    /// Re-run a stage that is pending or failed.
    Retry {
        id: String,

        /// `extraction`, `indexing` or `speech`.
        stage: Stage,
    },

    /// List the speech chunks generated so far.
    Chunks { id: String },

    /// Search a document's index.
    Search {
        id: String,
        query: String,

        /// Maximum number of hits.
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Ask a question about a document.
    Ask { id: String, question: String },

    /// Start the HTTP API.
    ///
    /// Recovers work interrupted by a previous shutdown before listening.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Add {
            source,
            title,
            content_type,
        } => {
            let pipeline = Pipeline::from_config(&cfg, open_store(&cfg).await?)?;
            let content_type = content_type.or_else(|| {
                let guessed = guess_content_type(std::path::Path::new(&source));
                (guessed != "application/octet-stream").then(|| guessed.to_string())
            });
            let doc = pipeline
                .add_document(NewDocument {
                    title: title.unwrap_or_else(|| default_title(&source)),
                    source_ref: source,
                    content_type,
                })
                .await?;
            println!("Added document {}", doc.id);
            pipeline.wait_idle().await;
            print_document(&reload(pipeline.store(), &doc.id).await?);
        }
        Commands::List => {
            let store = open_store(&cfg).await?;
            let docs = store.list_documents().await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  {:<32}  extraction={:<10} indexing={:<10} speech={}",
                    doc.id,
                    truncate(&doc.title, 32),
                    doc.extraction_status,
                    doc.indexing_status,
                    doc.speech_status
                );
            }
        }
        Commands::Status { id } => {
            let store = open_store(&cfg).await?;
            print_document(&reload(&store, &id).await?);
        }
        Commands::Retry { id, stage } => {
            let pipeline = Pipeline::from_config(&cfg, open_store(&cfg).await?)?;
            match pipeline.retry(&id, stage).await? {
                StageClaim::Started => {
                    println!("Retrying {} for {}", stage, id);
                    pipeline.wait_idle().await;
                    print_document(&reload(pipeline.store(), &id).await?);
                }
                StageClaim::Missing => bail!("document not found: {}", id),
                StageClaim::AlreadyRunning => println!("{} is already processing.", stage),
                StageClaim::AlreadyReady => println!("{} is already ready.", stage),
                StageClaim::NotReady => {
                    println!("{} needs extraction to be ready first.", stage)
                }
            }
        }
        Commands::Chunks { id } => {
            let store = open_store(&cfg).await?;
            let doc = reload(&store, &id).await?;
            let chunks = store.list_speech_chunks(&id).await?;
            let total = doc
                .speech_chunk_total
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "Speech {}: {} of {} chunks ready",
                doc.speech_status,
                chunks.len(),
                total
            );
            for chunk in chunks {
                let duration = chunk
                    .duration_ms
                    .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  #{:<4} [{}..{}] {:>6}  {}",
                    chunk.index,
                    chunk.start_offset,
                    chunk.end_offset,
                    duration,
                    truncate(&chunk.text, 60)
                );
            }
            if !doc.speech_failed_chunks.is_empty() {
                println!("  failed: {:?}", doc.speech_failed_chunks);
            }
        }
        Commands::Search { id, query, limit } => {
            let chat = chat_service(&cfg).await?;
            let result = chat.search(&id, &query, limit).await?;
            if result.entries.is_empty() {
                println!("No results.");
            }
            for (i, entry) in result.entries.iter().enumerate() {
                let chunk = entry
                    .chunk_index
                    .map(|c| format!("chunk {}", c))
                    .unwrap_or_default();
                println!(
                    "{}. [{:.2}] {}  {}",
                    i + 1,
                    entry.score,
                    chunk,
                    truncate(&entry.text, 80)
                );
            }
            if !result.matched_text.is_empty() {
                println!("\n{}", result.matched_text);
            }
        }
        Commands::Ask { id, question } => {
            let chat = chat_service(&cfg).await?;
            let answer = chat.ask(&id, &question).await?;
            println!("{}", answer.answer.content);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn Store>> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

async fn chat_service(cfg: &Config) -> Result<ChatService> {
    let store = open_store(cfg).await?;
    let indexer = lectern::embedding::create_indexer(&cfg.indexing, store.clone())?;
    ChatService::from_config(&cfg.chat, store, indexer)
}

async fn reload(store: &Arc<dyn Store>, id: &str) -> Result<Document> {
    match store.get_document(id).await? {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {}", id),
    }
}

fn print_document(doc: &Document) {
    println!("{}  {}", doc.id, doc.title);
    println!("  source: {}", doc.source_ref);
    for stage in Stage::ALL {
        match doc.error(stage) {
            Some(error) => println!("  {:<10} {}  ({})", stage, doc.status(stage), error),
            None => println!("  {:<10} {}", stage, doc.status(stage)),
        }
    }
    if let Some(count) = doc.chunk_count {
        println!("  index chunks: {}", count);
    }
    if let Some(total) = doc.speech_chunk_total {
        println!(
            "  speech chunks: {} planned, {} failed",
            total,
            doc.speech_failed_chunks.len()
        );
    }
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
