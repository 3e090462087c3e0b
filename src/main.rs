//! # docqa CLI
//!
//! Ingest documents, ask questions over them, and run the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database, its tables and the lexical index |
//! | `docqa ingest <path>` | Chunk, embed and index one file |
//! | `docqa query "<text>"` | Answer a question from the indexed documents |
//! | `docqa get <id>` | Show one indexed chunk |
//! | `docqa delete <id>` | Remove one chunk from the lexical index |
//! | `docqa repair` | Re-index chunks whose lexical write was lost |
//! | `docqa serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::{config, get, ingest, migrate, query, repair, server, services::Services};

/// Retrieval-augmented question answering over uploaded documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and the lexical index.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest one document (plain text, PDF or HTML).
    Ingest {
        /// File to ingest.
        path: PathBuf,

        /// Document name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Answer a question.
    Query {
        /// Question text.
        text: String,

        /// Number of vector neighbours to consider.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Show one chunk by id (`{document}_{ordinal}`).
    Get { id: String },

    /// Delete one chunk by id.
    Delete { id: String },

    /// Re-index chunks that have a vector but no lexical document.
    Repair,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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
            migrate::run_migrations(&cfg).await?;
            // Creates the lexical index as a side effect
            Services::from_config(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, name } => {
            ingest::run_ingest(&cfg, &path, name).await?;
        }
        Commands::Query { text, k } => {
            query::run_query(&cfg, &text, k).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            get::run_delete(&cfg, &id).await?;
        }
        Commands::Repair => {
            repair::run_repair(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
