//! # memex CLI
//!
//! Indexes Apple Notes and an IMAP mailbox into a local vector store and
//! answers questions over them.
//!
//! ## Usage
//!
//! ```bash
//! memex --config ./config/memex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memex init` | Create the SQLite database and run schema migrations |
//! | `memex sources` | List configured sources and their status |
//! | `memex sync <source>` | Sync `notes`, `mails`, or `all` into the index |
//! | `memex watch` | Poll the sources and sync whenever they change |
//! | `memex search "<query>"` | Print the documents closest to a query |
//! | `memex ask "<question>"` | Answer a question from the indexed documents |
//!
//! ## Examples
//!
//! ```bash
//! # Rebuild the notes collection from scratch
//! memex sync notes --flush
//!
//! # Pull the most recent mails without dropping older ones
//! memex sync mails
//!
//! # Keep chatting after the first answer
//! memex ask "what did the landlord say about the lease?" --interactive
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use memex::ask::AskOptions;
use memex::{ask, config, ingest, logging, migrate, search, sources};

#[derive(Parser)]
#[command(
    name = "memex",
    about = "Personal RAG assistant over Apple Notes and mail",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/memex.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// List configured sources
    Sources,

    /// Sync a source into the index
    Sync {
        /// Source to sync (notes, mails, all)
        source: String,

        /// Drop the collection and rebuild it from this sync alone
        #[arg(long)]
        flush: bool,
    },

    /// Watch the sources and sync on change
    Watch,

    /// Search the indexed notes and mails
    Search {
        /// The search query
        query: String,

        /// Results per source (defaults to retrieval.n_results)
        #[arg(long)]
        k: Option<usize>,

        /// Only search one source (notes, mails)
        #[arg(long)]
        source: Option<String>,
    },

    /// Ask a question, answered from the indexed documents
    Ask {
        /// The question
        question: String,

        /// Documents retrieved per source (defaults to retrieval.n_results)
        #[arg(long)]
        k: Option<usize>,

        /// Only retrieve from one source (notes, mails)
        #[arg(long)]
        source: Option<String>,

        /// Print the full prompt sent to the model
        #[arg(long)]
        show_prompt: bool,

        /// Keep asking follow-up questions until an empty line
        #[arg(long, short)]
        interactive: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging.level, cli.debug)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Sync { source, flush } => {
            ingest::run_sync(&cfg, &source, flush).await?;
        }
        Commands::Watch => {
            ingest::run_watch(&cfg).await?;
        }
        Commands::Search { query, k, source } => {
            search::run_search(&cfg, &query, k, source).await?;
        }
        Commands::Ask {
            question,
            k,
            source,
            show_prompt,
            interactive,
        } => {
            let opts = AskOptions {
                k,
                source,
                show_prompt,
                interactive,
            };
            ask::run_ask(&cfg, &question, opts).await?;
        }
    }

    Ok(())
}
