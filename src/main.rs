//! # docchat CLI
//!
//! Process documents into a local index, then ask questions about them.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat status` | Whether an index exists |
//! | `docchat process <FILES>...` | Load files and rebuild the index |
//! | `docchat ask "<question>"` | Answer one question |
//! | `docchat chat` | Interactive question loop on stdin |
//! | `docchat serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! docchat process sales.xlsx report.pdf notes.txt
//! docchat ask "What is the average Unit_Price?"
//! docchat --config ./docchat.toml serve
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `docchat=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docchat::config::{self, Config};
use docchat::embedding;
use docchat::index::{index_state, IndexState};
use docchat::indexer::create_vectorstore;
use docchat::ingest::{load_documents, Upload};
use docchat::llm::{ChatModel, GroqClient};
use docchat::models::{FileKind, SUPPORTED_EXTENSIONS};
use docchat::rag::{Answer, RagChain, NOT_READY_MESSAGE};
use docchat::server;
use docchat::session::Transcript;

/// Chat with your documents.
///
/// Process PDF, Excel, Word and text files into a local similarity index,
/// then ask questions answered only from their content.
#[derive(Parser)]
#[command(name = "docchat", version, about = "Chat with your documents")]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults are used when
    /// omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether documents have been processed.
    Status,

    /// Load files and replace the index with their content.
    ///
    /// Accepted extensions: pdf, xlsx, xls, docx, txt. Other files are
    /// reported and left out.
    Process {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Answer a single question from the processed documents.
    Ask { question: String },

    /// Ask questions interactively; one per line, `exit` to quit.
    Chat,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docchat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Status => {
            println!("{}", server::status_message(index_state(&cfg)));
        }
        Commands::Process { files } => {
            run_process(&cfg, &files).await?;
        }
        Commands::Ask { question } => {
            let Some(chain) = build_chain(&cfg).await? else {
                println!("{}", NOT_READY_MESSAGE);
                return Ok(());
            };
            let answer = chain.answer_question(&question).await?;
            print_answer(&answer);
        }
        Commands::Chat => {
            let Some(chain) = build_chain(&cfg).await? else {
                println!("{}", NOT_READY_MESSAGE);
                return Ok(());
            };
            run_chat(&chain).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_process(cfg: &Config, files: &[PathBuf]) -> Result<()> {
    let mut uploads = Vec::new();
    for path in files {
        let name = path.to_string_lossy();
        if FileKind::from_file_name(&name).is_none() {
            eprintln!(
                "Skipping unsupported file: {} (allowed: {})",
                path.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            );
            continue;
        }
        match Upload::from_path(path) {
            Ok(upload) => uploads.push(upload),
            Err(e) => eprintln!("Skipping {}: {:#}", path.display(), e),
        }
    }

    let documents = load_documents(cfg, &uploads).await;
    if documents.is_empty() {
        println!("No documents to process!");
        return Ok(());
    }

    let embedder = embedding::default_embedder(cfg).await?;
    match create_vectorstore(cfg, embedder.as_ref(), &documents).await? {
        Some(summary) => {
            println!("Documents processed!");
            println!("  documents: {}", summary.documents);
            println!("  chunks: {}", summary.chunks);
            println!("  embedding model: {} ({} dims)", summary.embedding_model, summary.dims);
            println!("  index: {}", summary.path.display());
        }
        None => println!("No documents to process!"),
    }
    Ok(())
}

/// `None` when there is no index yet; the models are not loaded in that case.
async fn build_chain(cfg: &Config) -> Result<Option<RagChain>> {
    if index_state(cfg) == IndexState::Empty {
        return Ok(None);
    }
    let chat_model: Arc<dyn ChatModel> = Arc::new(GroqClient::new(cfg.api_key())?);
    let embedder = embedding::default_embedder(cfg).await?;
    Ok(Some(RagChain::new(cfg.clone(), embedder, chat_model)))
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text());
    if let Answer::Generated { sources, .. } = answer {
        for source in sources {
            match source.metadata.page {
                Some(page) => eprintln!(
                    "  source: {} (page {}, chunk {}, score {:.3})",
                    source.metadata.source, page, source.chunk_index, source.score
                ),
                None => eprintln!(
                    "  source: {} (chunk {}, score {:.3})",
                    source.metadata.source, source.chunk_index, source.score
                ),
            }
        }
    }
}

async fn run_chat(chain: &RagChain) -> Result<()> {
    let mut transcript = Transcript::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("Ask about your documents (`exit` to quit).");
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        transcript.push_user(question);
        match chain.answer_question(question).await {
            Ok(answer) => {
                print_answer(&answer);
                transcript.push_assistant(answer.text());
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    tracing::debug!(turns = transcript.len(), "chat ended");
    Ok(())
}
