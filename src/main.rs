//! # Chat Sieve CLI (`sieve`)
//!
//! The `sieve` binary ingests chat-export archives into a redacted vector
//! index and queries it.
//!
//! ## Usage
//!
//! ```bash
//! sieve --config ./config/sieve.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sieve init` | Create the SQLite index and run schema migrations |
//! | `sieve ingest <archive>` | Extract, flatten, redact and commit an archive |
//! | `sieve search "<query>"` | Print matching messages in distance order |
//! | `sieve users "<query>"` | Print the users behind matching messages |
//! | `sieve stats` | Show index location, size and record counts |
//! | `sieve redact "<text>"` | Preview the configured redaction |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chat_sieve::config::{self, Config};
use chat_sieve::progress::ProgressMode;
use chat_sieve::{ingest, migrate, redact, search, stats};

/// Chat Sieve CLI: redacted semantic search over chat-export archives.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sieve.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sieve",
    about = "Chat Sieve: redacted semantic search over chat-export archives",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sieve.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is unset (e.g. `info`, `chat_sieve=debug`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the index schema.
    ///
    /// Creates the SQLite file and tables. Idempotent.
    Init,

    /// Ingest a chat-export archive.
    ///
    /// Reads the archive one user at a time, flattens each conversation
    /// into context-bearing units, redacts PII and commits the units to
    /// the index in batches.
    Ingest {
        /// Path to the archive (a JSON array of user records).
        archive: PathBuf,

        /// Units per committed batch. Overrides `ingest.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Progress on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search indexed messages.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results. Overrides `retrieval.result_count`.
        #[arg(long)]
        limit: Option<usize>,

        /// Maximum distance for a result to be kept.
        #[arg(long)]
        threshold: Option<f64>,

        /// Print rows as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the users whose messages match a query.
    Users {
        /// The search query string.
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Show index statistics.
    Stats,

    /// Show what the configured redactor does to a piece of text.
    Redact {
        text: String,
    },
}

fn init_tracing(cli_level: Option<&str>, config_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(cli_level.or(config_level).unwrap_or("warn"))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Redaction preview runs without a config file, but a file that exists
    // must parse and validate.
    if let Commands::Redact { text } = &cli.command {
        let cfg = if cli.config.exists() {
            config::load_config(&cli.config)?
        } else {
            Config::minimal()
        };
        init_tracing(cli.log_level.as_deref(), cfg.log_level.as_deref());
        redact::run_redact(&cfg.redaction, text).await?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    init_tracing(cli.log_level.as_deref(), cfg.log_level.as_deref());

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Index initialized successfully.");
        }
        Commands::Ingest {
            archive,
            batch_size,
            progress,
            json,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, &archive, batch_size, progress, json).await?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
            json,
        } => {
            search::run_search(&cfg, &query, limit, threshold, json).await?;
        }
        Commands::Users {
            query,
            limit,
            threshold,
        } => {
            search::run_users(&cfg, &query, limit, threshold).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Redact { .. } => {}
    }

    Ok(())
}
