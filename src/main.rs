//! # docgrok CLI (`grok`)
//!
//! ## Usage
//!
//! ```bash
//! grok [--config ./grok.toml] [--progress human] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grok init` | Create an empty index |
//! | `grok add <paths>` | Index files or directories |
//! | `grok forget <paths>` | Drop documents from the index |
//! | `grok refresh` | Re-index modified documents |
//! | `grok ls` | List indexed documents |
//! | `grok q "<question>"` | Answer a question from the index |
//! | `grok chat` | Answer questions from stdin, one per line |
//! | `grok send` | Send files to the model and write back its files |
//! | `grok tokens` | Estimate token count |
//! | `grok models` | List known chat models |
//! | `grok model <name>` | Select the default chat model |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docgrok::ask::{self, SendRequest};
use docgrok::config;
use docgrok::ingest;
use docgrok::progress::ProgressMode;

/// docgrok: ask questions about your documents.
#[derive(Parser)]
#[command(
    name = "grok",
    about = "Semantic index over local documents with retrieval-augmented answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Optional; defaults apply when missing.
    #[arg(long, global = true, default_value = "./grok.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create an empty index at the configured store path.
    Init {
        /// Overwrite an existing index.
        #[arg(long)]
        force: bool,
    },

    /// Add files or directories to the index and embed them.
    ///
    /// Directories are walked recursively and filtered by the
    /// `[ingest]` include/exclude globs.
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove files (or everything under a directory) from the index.
    Forget {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Re-index documents modified since the last save.
    Refresh {
        /// Discard all embeddings and re-embed every document.
        ///
        /// Required after changing the embedding model.
        #[arg(long)]
        full: bool,
    },

    /// List indexed documents.
    Ls,

    /// Answer a question using the indexed documents as context.
    Q {
        /// Also draw on the model's general knowledge.
        #[arg(short, long)]
        global: bool,

        /// The question. Read from stdin when omitted.
        question: Option<String>,
    },

    /// Answer questions from stdin, one per line.
    Chat {
        /// Also draw on the model's general knowledge.
        #[arg(short, long)]
        global: bool,
    },

    /// Send a prompt with input files and extract the requested output files.
    Send {
        /// System message.
        #[arg(long, default_value = "You are an expert software engineer.")]
        sys: String,

        /// Input file to include (repeatable).
        #[arg(long = "in")]
        in_files: Vec<PathBuf>,

        /// Output file to request and write back (repeatable).
        #[arg(long = "out")]
        out_files: Vec<PathBuf>,

        /// Print the reply but write no files.
        #[arg(long)]
        dry_run: bool,

        /// The prompt. Read from stdin when omitted.
        prompt: Option<String>,
    },

    /// Estimate the token count of text (or stdin).
    Tokens { text: Option<String> },

    /// List known chat models.
    Models,

    /// Select the default chat model.
    Model { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "docgrok=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config_or_default(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init { force } => {
            ingest::run_init(&cfg, force)?;
        }
        Commands::Add { paths } => {
            ingest::run_add(&cfg, progress, &paths).await?;
        }
        Commands::Forget { paths } => {
            ingest::run_forget(&cfg, &paths)?;
        }
        Commands::Refresh { full } => {
            ingest::run_refresh(&cfg, progress, full).await?;
        }
        Commands::Ls => {
            ingest::run_list(&cfg)?;
        }
        Commands::Q { global, question } => {
            ask::run_query(&cfg, progress, question, global).await?;
        }
        Commands::Chat { global } => {
            ask::run_chat(&cfg, progress, global).await?;
        }
        Commands::Send {
            sys,
            in_files,
            out_files,
            dry_run,
            prompt,
        } => {
            let request = SendRequest {
                sysmsg: sys,
                prompt,
                in_files,
                out_files,
                dry_run,
            };
            ask::run_send(&cfg, progress, request).await?;
        }
        Commands::Tokens { text } => {
            ask::run_tokens(&cfg, text).await?;
        }
        Commands::Models => {
            ask::run_models(&cfg)?;
        }
        Commands::Model { name } => {
            ask::run_select_model(&cfg, &name)?;
        }
    }

    Ok(())
}
