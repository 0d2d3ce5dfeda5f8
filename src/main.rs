//! # Lorekeeper CLI (`lore`)
//!
//! Manage per-game knowledge packs and query their indexes.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore init` | Create the pack database and index directory |
//! | `lore pack add` | Import files, URLs, and notes as a new pack |
//! | `lore pack list` | List the packs of a game context |
//! | `lore pack remove <id>` | Delete a pack and drop it from the index |
//! | `lore pack enable/disable <id>` | Toggle a pack |
//! | `lore rebuild` | Re-ingest every enabled pack of a context |
//! | `lore status` | Show a context's index state |
//! | `lore query "<q>"` | Ranked chunks for a query |
//! | `lore ask "<question>"` | The prompt block the chat loop would receive |
//!
//! ## Examples
//!
//! ```bash
//! lore init --config ./config/lore.toml
//! lore pack add --context elden-ring --name "Boss guides" --file ./guides --url https://example.com/malenia
//! lore query --context elden-ring "malenia waterfowl dance"
//! lore ask --context elden-ring "how do I dodge waterfowl dance?"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use lorekeeper::app::Lorekeeper;
use lorekeeper::config::{self, Config};
use lorekeeper::knowledge::KnowledgeSettings;
use lorekeeper::{db, logging, migrate};
use lorekeeper_core::ingest::PackIngestReport;
use lorekeeper_core::models::{KnowledgePack, KnowledgeSource, SourceKind};
use lorekeeper_core::search::SearchParams;
use lorekeeper_core::store::PackStore;

/// Lorekeeper CLI: per-game knowledge packs with semantic search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lore.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "lore", version, about = "Per-game knowledge packs with TF-IDF search")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pack database schema and the index directory. Idempotent.
    Init,

    /// Manage knowledge packs.
    Pack {
        #[command(subcommand)]
        action: PackAction,
    },

    /// Re-ingest and re-index every enabled pack of a context.
    Rebuild {
        #[arg(long)]
        context: String,
    },

    /// Show the index state of a context.
    Status {
        #[arg(long)]
        context: String,
    },

    /// Print the ranked chunks for a query.
    Query {
        #[arg(long)]
        context: String,

        query: String,

        /// Results to return (1-10). Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum cosine similarity (0.0-1.0). Defaults to `retrieval.min_score`.
        #[arg(long)]
        min_score: Option<f64>,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the knowledge block that would be prepended to a chat prompt.
    Ask {
        #[arg(long)]
        context: String,

        question: String,
    },
}

#[derive(Subcommand)]
enum PackAction {
    /// Create a pack from files, directories, URLs, and inline notes.
    Add {
        #[arg(long)]
        context: String,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// File or directory to import (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Web page to import (repeatable).
        #[arg(long = "url")]
        urls: Vec<String>,

        /// Inline note text (repeatable).
        #[arg(long = "note")]
        notes: Vec<String>,

        /// Tag applied to every source (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Store the pack without indexing it.
        #[arg(long)]
        disabled: bool,
    },

    /// List the packs of a context.
    List {
        #[arg(long)]
        context: String,
    },

    /// Delete a pack.
    Remove { id: String },

    /// Include a pack in its context's index.
    Enable { id: String },

    /// Exclude a pack from its context's index.
    Disable { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level, cfg.logging.file.as_deref())?;

    match cli.command {
        Commands::Init => init(&cfg).await?,
        Commands::Pack { action } => {
            let app = Lorekeeper::open(&cfg).await?;
            let result = run_pack_action(&app, action).await;
            app.close().await;
            result?;
        }
        Commands::Rebuild { context } => {
            let app = Lorekeeper::open(&cfg).await?;
            let reports = app.index.rebuild(&context).await?;
            for report in &reports {
                print_report(report);
            }
            println!("{}: {}", context, app.index.status(&context).await);
            app.close().await;
        }
        Commands::Status { context } => {
            let app = Lorekeeper::open(&cfg).await?;
            println!("{}: {}", context, app.index.status(&context).await);
            app.close().await;
        }
        Commands::Query {
            context,
            query,
            top_k,
            min_score,
            json,
        } => {
            let app = Lorekeeper::open(&cfg).await?;
            let params = SearchParams::new(
                top_k.unwrap_or(app.settings.depth),
                min_score.unwrap_or(app.settings.min_score),
            );
            let hits = app.index.query(&context, &query, params).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} (pack {}, chunk {})",
                        i + 1,
                        hit.score,
                        hit.source_title,
                        hit.pack_id,
                        hit.sequence_no
                    );
                    println!("    {}", snippet(&hit.text, 160));
                }
            }
            app.close().await;
        }
        Commands::Ask { context, question } => {
            let app = Lorekeeper::open(&cfg).await?;
            let settings: KnowledgeSettings = app.settings;
            match app
                .knowledge
                .get_context(&context, &question, &settings)
                .await
            {
                Some(block) => println!("{}", block),
                None => println!("No knowledge context."),
            }
            app.close().await;
        }
    }

    Ok(())
}

async fn init(cfg: &Config) -> Result<()> {
    let pool = db::connect(&cfg.store.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    std::fs::create_dir_all(&cfg.index.dir).with_context(|| {
        format!("Failed to create index directory {}", cfg.index.dir.display())
    })?;
    println!("Initialized pack store at {}", cfg.store.path.display());
    Ok(())
}

async fn run_pack_action(app: &Lorekeeper, action: PackAction) -> Result<()> {
    match action {
        PackAction::Add {
            context,
            name,
            description,
            files,
            urls,
            notes,
            tags,
            disabled,
        } => {
            if files.is_empty() && urls.is_empty() && notes.is_empty() {
                bail!("a pack needs at least one --file, --url, or --note");
            }
            let mut pack = KnowledgePack::new(name, context);
            pack.description = description;
            pack.enabled = !disabled;
            for path in &files {
                let source = KnowledgeSource::new(SourceKind::File, file_title(path), absolute(path)?);
                pack.sources.push(source.with_tags(tags.iter().cloned()));
            }
            for url in &urls {
                let source = KnowledgeSource::new(SourceKind::Url, url.clone(), url.clone());
                pack.sources.push(source.with_tags(tags.iter().cloned()));
            }
            for (i, note) in notes.iter().enumerate() {
                let source = KnowledgeSource::note(format!("Note {}", i + 1), note.clone());
                pack.sources.push(source.with_tags(tags.iter().cloned()));
            }

            let id = pack.id.clone();
            let report = app.index.add_pack(pack).await?;
            println!("Added pack {}", id);
            print_report(&report);
        }
        PackAction::List { context } => {
            let packs = app.store.load_packs(&context).await?;
            if packs.is_empty() {
                println!("No packs in context '{}'.", context);
            }
            for pack in packs {
                println!(
                    "{}  {}  [{}]  {} sources",
                    pack.id,
                    pack.name,
                    if pack.enabled { "enabled" } else { "disabled" },
                    pack.sources.len()
                );
            }
        }
        PackAction::Remove { id } => {
            if app.index.remove_pack(&id).await? {
                println!("Removed pack {}", id);
            } else {
                bail!("no pack with id {}", id);
            }
        }
        PackAction::Enable { id } => toggle(app, &id, true).await?,
        PackAction::Disable { id } => toggle(app, &id, false).await?,
    }
    Ok(())
}

async fn toggle(app: &Lorekeeper, id: &str, enabled: bool) -> Result<()> {
    let word = if enabled { "enabled" } else { "disabled" };
    match app.index.set_pack_enabled(id, enabled).await? {
        Some(report) => {
            println!("Pack {} {}", id, word);
            if enabled {
                print_report(&report);
            }
        }
        None => println!("Pack {} already {}", id, word),
    }
    Ok(())
}

fn print_report(report: &PackIngestReport) {
    println!(
        "  pack {}: {} ({} chunks)",
        report.pack_id,
        report.summary(),
        report.chunks
    );
    for failure in &report.failures {
        println!("    skipped {}: {}", failure.title, failure.error);
    }
}

fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn absolute(path: &Path) -> Result<String> {
    let abs = std::path::absolute(path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    Ok(abs.to_string_lossy().to_string())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}
