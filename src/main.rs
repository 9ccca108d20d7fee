//! # Ragloom CLI (`loom`)
//!
//! Chunk, ingest and search a local knowledge base.
//!
//! ## Usage
//!
//! ```bash
//! loom --config ./config/loom.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `loom init` | Create the SQLite database and schema |
//! | `loom ingest <path>` | Chunk, embed and store files under a path |
//! | `loom chunk <file>` | Print the chunks of one file without storing them |
//! | `loom search "<query>"` | Similarity, keyword or hybrid search |
//! | `loom get <chunk-id>` | Print one stored chunk |
//! | `loom delete <chunk-id>` | Remove one stored chunk |
//! | `loom stats` | Counts of chunks, vectors and parents |
//! | `loom clear` | Remove every stored chunk |
//!
//! ## Examples
//!
//! ```bash
//! loom init
//! loom ingest ./notes --dry-run
//! loom ingest ./notes
//! loom search "eigenvalue bounds" --mode hybrid --alpha 0.4
//! loom search "budget" --filter type=email_body --filter email_sender=alice@example.com
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragloom::config::{self, Config};
use ragloom::embedding::create_embedder;
use ragloom::ingest::{self, SourceItem};
use ragloom::manager::{KnowledgeBaseManager, ManagerSettings};
use ragloom::sqlite_store::SqliteStore;
use ragloom_core::filter::{FilterBuilder, FilterPredicate, FilterValue};
use ragloom_core::search::SearchType;

/// Ragloom CLI: structure-aware chunking and hybrid retrieval over a
/// local SQLite knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/loom.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "loom",
    about = "Ragloom: structure-aware chunking and hybrid retrieval for RAG pipelines",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/loom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Safe to run repeatedly.
    Init,

    /// Ingest a file or directory.
    ///
    /// Markdown, LaTeX and text files become documents; JSON files hold
    /// one email or an array of emails. Re-ingesting a file replaces its
    /// chunks.
    Ingest {
        path: PathBuf,

        /// Scan and chunk without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Chunk one file and print the chunks.
    Chunk {
        file: PathBuf,

        /// Print JSON instead of a summary per chunk.
        #[arg(long)]
        json: bool,
    },

    /// Search stored chunks.
    Search {
        query: String,

        /// `similar`, `keyword` or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Weight of the vector signal in hybrid mode.
        #[arg(long)]
        alpha: Option<f64>,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Metadata filter: `field=value`, `field=a|b` or `field=lo..hi`.
        /// Repeated filters must all match.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Show per-signal scores.
        #[arg(long)]
        explain: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a stored chunk.
    Get { id: String },

    /// Delete a stored chunk.
    Delete { id: String },

    /// Show knowledge base statistics.
    Stats,

    /// Remove every stored chunk.
    Clear,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_value(raw: &str) -> FilterValue {
    if let Ok(b) = raw.parse::<bool>() {
        return FilterValue::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return FilterValue::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return FilterValue::Float(f);
        }
    }
    FilterValue::String(raw.to_string())
}

/// Build a conjunction of `--filter` arguments.
fn build_filter(filters: &[(String, String)]) -> Result<Option<FilterPredicate>> {
    let mut parts = Vec::with_capacity(filters.len());
    for (field, raw) in filters {
        let part = if let Some((lo, hi)) = raw.split_once("..") {
            FilterBuilder::range(field.as_str(), parse_value(lo), parse_value(hi))
        } else if raw.contains('|') {
            let values: Vec<FilterValue> = raw.split('|').map(parse_value).collect();
            FilterBuilder::one_of(field.as_str(), values)
        } else {
            FilterBuilder::equals(field.as_str(), parse_value(raw))
        };
        parts.push(part);
    }
    match parts.len() {
        0 => Ok(None),
        1 => Ok(Some(parts.remove(0).build()?)),
        _ => Ok(Some(FilterBuilder::and(parts)?.build()?)),
    }
}

async fn open_manager(config: &Config) -> Result<(KnowledgeBaseManager, Arc<SqliteStore>)> {
    let store = Arc::new(
        SqliteStore::open(&config.db.path)
            .await
            .with_context(|| format!("Failed to open database {}", config.db.path.display()))?,
    );
    store.init_schema().await?;
    let embedder = create_embedder(&config.embedding)?;
    let settings = ManagerSettings::from_config(config)?;
    Ok((
        KnowledgeBaseManager::new(store.clone(), embedder, settings),
        store,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragloom=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&cfg.db.path).await?;
            store.init_schema().await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, dry_run } => {
            let (manager, store) = open_manager(&cfg).await?;
            let flag = manager.cancellation_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing in-flight documents");
                    flag.cancel();
                }
            });
            let summary = ingest::ingest_path(&manager, &cfg.ingest, &path, dry_run).await?;
            store.close().await;
            if summary.parents == 0 && !summary.failed.is_empty() {
                bail!("no documents were ingested");
            }
        }
        Commands::Chunk { file, json } => {
            let (manager, store) = open_manager(&cfg).await?;
            let source = ingest::SourceFile {
                relative: file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.display().to_string()),
                path: file.clone(),
            };
            let chunks = match ingest::load_file(&source)? {
                SourceItem::Document(doc) => manager.chunk_document(&doc)?,
                SourceItem::Emails(emails) => {
                    let mut all = Vec::new();
                    for email in &emails {
                        all.extend(manager.chunk_email(email)?);
                    }
                    all
                }
            };
            store.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for c in &chunks {
                    println!(
                        "#{} {} [{}..{}] {} tokens{}",
                        c.sequence_index,
                        c.metadata.kind.as_str(),
                        c.start_offset,
                        c.end_offset,
                        c.metadata.chunk_size,
                        c.metadata
                            .section_title
                            .as_deref()
                            .map(|t| format!(" \"{}\"", t))
                            .unwrap_or_default()
                    );
                }
                println!("{} chunks", chunks.len());
            }
        }
        Commands::Search {
            query,
            mode,
            alpha,
            top_k,
            filters,
            explain,
            json,
        } => {
            let (manager, store) = open_manager(&cfg).await?;
            let search_type =
                SearchType::parse(&mode, alpha.unwrap_or(manager.settings().hybrid_alpha))?;
            let filter = build_filter(&filters)?;
            let response = manager
                .query(&query, search_type, top_k, filter.as_ref())
                .await?;
            store.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if response.results.is_empty() {
                println!("No results.");
            } else {
                for r in &response.results {
                    let source = r
                        .metadata
                        .get("source_document")
                        .and_then(|v| v.as_str())
                        .unwrap_or("-");
                    let kind = r.metadata.get("type").and_then(|v| v.as_str()).unwrap_or("-");
                    println!(
                        "{}. [{:.2}] {} ({}) {}",
                        r.rank, r.similarity_score, source, kind, r.chunk_id
                    );
                    if explain {
                        println!(
                            "    vector: {}  keyword: {}",
                            r.scores
                                .vector
                                .map(|s| format!("{:.3}", s))
                                .unwrap_or_else(|| "-".into()),
                            r.scores
                                .keyword
                                .map(|s| format!("{:.3}", s))
                                .unwrap_or_else(|| "-".into())
                        );
                    }
                    let snippet: String = r.content.chars().take(200).collect();
                    println!("    {}", snippet.replace('\n', " "));
                }
                println!();
                println!(
                    "{} results, {} sources, max {:.2}, avg {:.2}",
                    response.results.len(),
                    response.sources.len(),
                    response.max_similarity,
                    response.avg_similarity
                );
            }
        }
        Commands::Get { id } => {
            let (manager, store) = open_manager(&cfg).await?;
            let record = manager.get_chunk(&id).await?;
            store.close().await;
            match record {
                Some(r) => println!("{}", serde_json::to_string_pretty(&r)?),
                None => bail!("Chunk not found: {}", id),
            }
        }
        Commands::Delete { id } => {
            let (manager, store) = open_manager(&cfg).await?;
            let removed = manager.delete_chunk(&id).await?;
            store.close().await;
            if !removed {
                bail!("Chunk not found: {}", id);
            }
            println!("Deleted {}", id);
        }
        Commands::Stats => {
            let (manager, store) = open_manager(&cfg).await?;
            let stats = manager.stats().await?;
            store.close().await;
            println!("Ragloom stats");
            println!("=============");
            println!("  Database:    {}", cfg.db.path.display());
            println!("  Parents:     {}", stats.store.parents);
            println!("  Chunks:      {}", stats.store.chunks);
            println!(
                "  Embedded:    {} / {}",
                stats.store.vectors, stats.store.chunks
            );
            println!(
                "  Embedder:    {} ({} dims)",
                stats.embedding_model, stats.embedding_dims
            );
            println!("  Tokenizer:   {}", stats.tokenizer);
            println!("  Strategies:  {}", stats.strategies.join(", "));
        }
        Commands::Clear => {
            let (manager, store) = open_manager(&cfg).await?;
            manager.clear().await?;
            store.close().await;
            println!("Knowledge base cleared.");
        }
    }

    Ok(())
}
