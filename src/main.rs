//! # Context Vault CLI (`cvault`)
//!
//! The `cvault` binary is a thin binding over [`context_vault::vault::Vault`].
//! Every command opens the vault, performs one operation and exits; no
//! state is kept between invocations beyond the vault directory itself.
//!
//! ## Usage
//!
//! ```bash
//! cvault --config ./config/cvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvault init` | Create the vault directory layout |
//! | `cvault import <path>` | Import a file or a directory tree |
//! | `cvault search "<query>"` | Hybrid keyword + vector search |
//! | `cvault evidence "<query>"` | Search with citations, recorded in the audit log |
//! | `cvault fact add <s> <p> <o>` | Record a fact |
//! | `cvault fact list` | List facts |
//! | `cvault forget <id> --reason <r>` | Tombstone a record |
//! | `cvault get <id>` | Print a record (or raw object bytes) |
//! | `cvault verify` | Check object integrity and the audit chain |
//! | `cvault repair-audit` | Drop a torn final audit event after a crash |
//! | `cvault export-audit` | Export the audit chain as a JSON package |
//! | `cvault sign <file> --signer <id>` | Sign a frame |
//! | `cvault verify-frame <file>` | Verify a signed frame |
//! | `cvault stats` | Vault statistics |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use context_vault::vault::{FactFilter, NewFact, Vault};
use context_vault::{config, export, facts, get, import, search, stats, verify};

/// Context Vault CLI: a local-first knowledge store with a tamper-evident
/// audit log.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "cvault",
    about = "Context Vault: a local-first knowledge store with hybrid retrieval and a tamper-evident audit log",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cvault.toml`. A relative `vault.root` is
    /// resolved against the directory holding this file.
    #[arg(long, global = true, default_value = "./config/cvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the vault layout (objects/, index/, audit/).
    ///
    /// Idempotent: running it on an existing vault only reloads it.
    Init,

    /// Import a UTF-8 file, or every matching file under a directory.
    Import {
        /// File or directory to import.
        path: PathBuf,

        /// Document title (single files only; defaults to the file name).
        #[arg(long)]
        title: Option<String>,

        /// Include glob, relative to the directory (repeatable).
        #[arg(long)]
        include: Vec<String>,

        /// Exclude glob, relative to the directory (repeatable).
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Rank chunks for a query.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Rank chunks and print an evidence pack with citations as JSON.
    Evidence {
        query: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Record and list facts.
    Fact {
        #[command(subcommand)]
        action: FactAction,
    },

    /// Tombstone a document, chunk, fact or summary.
    Forget {
        id: String,

        #[arg(long)]
        reason: String,
    },

    /// Print any record by id, or raw object bytes by hash.
    Get { id: String },

    /// Verify every object and the audit chain.
    Verify,

    /// Drop a torn final audit event left by an interrupted write.
    RepairAudit,

    /// Export audit events as a self-contained JSON package.
    ExportAudit {
        /// First event position (inclusive).
        #[arg(long)]
        from: Option<u64>,

        /// Last event position (exclusive).
        #[arg(long)]
        to: Option<u64>,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Sign the frame in a file with a configured key.
    Sign {
        file: PathBuf,

        #[arg(long)]
        signer: String,
    },

    /// Verify a signed frame using the key of its signer.
    VerifyFrame {
        file: PathBuf,

        /// Require the frame to be signed by this signer.
        #[arg(long)]
        signer: Option<String>,
    },

    /// Show vault statistics.
    Stats,
}

/// Fact subcommands.
#[derive(Subcommand)]
enum FactAction {
    /// Record a subject–predicate–object fact.
    Add {
        subject: String,
        predicate: String,
        object: String,

        /// Confidence in [0.0, 1.0].
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,

        /// Chunk the fact was extracted from.
        #[arg(long)]
        source_chunk: Option<String>,

        /// Conversation the fact came from.
        #[arg(long)]
        conversation: Option<String>,
    },

    /// List facts, optionally filtered.
    List {
        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        predicate: Option<String>,

        #[arg(long)]
        object: Option<String>,

        #[arg(long)]
        conversation: Option<String>,

        /// Include forgotten facts.
        #[arg(long)]
        all: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let mut vault = Vault::open(cfg.clone())?;
            vault.save()?;
            println!("Vault initialized at {}", cfg.vault.root.display());
        }
        Commands::Import {
            path,
            title,
            include,
            exclude,
        } => {
            let mut vault = Vault::open(cfg)?;
            if path.is_dir() {
                let report = import::import_path(&mut vault, &path, &include, &exclude)?;
                for (source, id) in &report.imported {
                    println!("{}  {}", id, source);
                }
                for (source, reason) in &report.skipped {
                    eprintln!("skipped {}: {}", source, reason);
                }
                eprintln!(
                    "Imported {} files ({} skipped)",
                    report.imported.len(),
                    report.skipped.len()
                );
            } else {
                let id = import::import_file(&mut vault, &path, title.as_deref())?;
                println!("{}", id);
            }
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit)?;
        }
        Commands::Evidence { query, limit } => {
            search::run_evidence(&cfg, &query, limit)?;
        }
        Commands::Fact { action } => match action {
            FactAction::Add {
                subject,
                predicate,
                object,
                confidence,
                source_chunk,
                conversation,
            } => {
                let mut fact = NewFact::new(&subject, &predicate, &object, confidence);
                fact.source_chunk = source_chunk;
                facts::run_fact_add(&cfg, fact, conversation.as_deref())?;
            }
            FactAction::List {
                subject,
                predicate,
                object,
                conversation,
                all,
            } => {
                let filter = FactFilter {
                    subject,
                    predicate,
                    object,
                    conversation_id: conversation,
                    include_forgotten: all,
                };
                facts::run_fact_list(&cfg, &filter)?;
            }
        },
        Commands::Forget { id, reason } => {
            facts::run_forget(&cfg, &id, &reason)?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id)?;
        }
        Commands::Verify => {
            verify::run_verify(&cfg)?;
        }
        Commands::RepairAudit => {
            verify::run_repair_audit(&cfg)?;
        }
        Commands::ExportAudit { from, to, output } => {
            export::run_export_audit(&cfg, from, to, output.as_deref())?;
        }
        Commands::Sign { file, signer } => {
            verify::run_sign(&cfg, &file, &signer)?;
        }
        Commands::VerifyFrame { file, signer } => {
            verify::run_verify_frame(&cfg, &file, signer.as_deref())?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}
