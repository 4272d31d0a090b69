//! Main module for the doc_sage CLI (`sage`).
//!
//! Parses the command line, loads configuration, wires the retrieval
//! pipeline together, and executes the requested subcommand.
//!
//! # Examples
//!
//! ```sh
//! sage init
//! sage index report.txt
//! sage ask report "What does the report conclude?"
//! ```

mod commands;

use clap::Parser;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use doc_sage::chunker::clean_text;
use doc_sage::config::{AppConfig, load_config};
use doc_sage::config_dir;
use doc_sage::embedding::{CandleEmbedder, Embedder};
use doc_sage::indexer::DocumentIndexer;
use doc_sage::qa::{DocumentQa, OpenAiGenerator, PromptBuilder};
use doc_sage::registry::IndexRegistry;
use doc_sage::retriever::{QueryProcessor, Retrieval};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = commands::Cli::parse();

    if let commands::Commands::Init = cli.command {
        return init();
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_dir()?.join("config.yaml"),
    };
    let config = load_config(config_path.to_str().ok_or("config path is not valid UTF-8")?)?;

    let registry = Arc::new(IndexRegistry::new(resolve_index_dir(&config)?));

    match cli.command {
        commands::Commands::Init => {}
        commands::Commands::Index { file, id, name } => {
            let document_id = match id {
                Some(id) => id,
                None => derive_document_id(&file)?,
            };
            let document_name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| document_id.clone())
            });

            let text = clean_text(&fs::read_to_string(&file)?);
            let indexer = build_indexer(&config, Arc::clone(&registry)).await?;
            let report = indexer
                .index_document(&document_id, &text, &document_name)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        commands::Commands::Ask {
            document_id,
            question,
            json,
        } => {
            let indexer = build_indexer(&config, Arc::clone(&registry)).await?;
            let processor = QueryProcessor::new(Arc::clone(&indexer));
            let retrieval = processor
                .process_query(&document_id, &question, config.max_chunks, config.min_score)
                .await?;

            let set = match retrieval {
                Retrieval::Miss(reason) => {
                    println!("{}", reason.message());
                    return Ok(());
                }
                Retrieval::Hit(set) => set,
            };

            let qa = DocumentQa::new(
                Arc::new(OpenAiGenerator::new(
                    &config.api_base,
                    &config.api_key,
                    &config.model,
                )),
                PromptBuilder::new(
                    config.context_char_budget,
                    config.history_turns,
                    config.history_answer_cap,
                ),
                config.request_timeout(),
            );
            let answer = qa
                .answer_question(&question, &set.contexts, &document_id, &[])
                .await;

            if json {
                let payload = serde_json::json!({
                    "answer": answer,
                    "sources": set.sources,
                    "total_found": set.total_found,
                    "average_score": set.average_score,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("{}", answer.answer);
            }
        }
        commands::Commands::Forget { document_id } => {
            registry
                .delete(&document_id, config.embedding_dimension)
                .await?;
            println!("index removed for '{document_id}'");
        }
        commands::Commands::Stats { document_id } => {
            let stats = registry
                .stats(&document_id, config.embedding_dimension)
                .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        commands::Commands::List => {
            for id in registry.list_available() {
                println!("{id}");
            }
        }
    }

    Ok(())
}

/// Write a default configuration file, creating the config directory if
/// needed.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = config_dir()?;
    fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.yaml");
    info!("creating config file: {}", config_path.display());

    let config = AppConfig {
        api_base: "http://localhost:11434/v1".to_string(),
        api_key: "CHANGEME".to_string(),
        model: "qwen2.5:14b".to_string(),
        embedding_model: doc_sage::embedding::DEFAULT_MODEL_ID.to_string(),
        embedding_dimension: 384,
        chunk_size: 1000,
        chunk_overlap: 200,
        max_chunks: 5,
        min_score: 0.1,
        context_char_budget: 2500,
        history_turns: 2,
        history_answer_cap: 200,
        request_timeout_secs: 60,
        index_dir: None,
    };
    fs::write(&config_path, serde_yaml::to_string(&config)?)?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn resolve_index_dir(config: &AppConfig) -> Result<PathBuf, Box<dyn Error>> {
    Ok(match &config.index_dir {
        Some(dir) => dir.clone(),
        None => config_dir()?.join("indexes"),
    })
}

/// Activate the embedding model and assemble the indexing service.
async fn build_indexer(
    config: &AppConfig,
    registry: Arc<IndexRegistry>,
) -> Result<Arc<DocumentIndexer>, Box<dyn Error>> {
    let embedder = Arc::new(CandleEmbedder::new(config.embedding_model.clone()));
    embedder.activate().await?;

    let dimension = embedder.dimension()?;
    if dimension != config.embedding_dimension {
        warn!(
            configured = config.embedding_dimension,
            actual = dimension,
            "embedding dimension differs from configuration; using the model's"
        );
    }

    Ok(Arc::new(DocumentIndexer::new(
        embedder,
        registry,
        config.chunker(),
        config.request_timeout(),
    )))
}

/// Document id from a file name: lowercased stem with anything outside
/// `[A-Za-z0-9_-]` replaced by `-`.
fn derive_document_id(file: &std::path::Path) -> Result<String, Box<dyn Error>> {
    let stem = file
        .file_stem()
        .ok_or("cannot derive a document id from the file name")?
        .to_string_lossy();
    let id: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if id.is_empty() {
        return Err("cannot derive a document id from the file name".into());
    }
    Ok(id)
}
