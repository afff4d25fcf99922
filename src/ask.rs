//! Question and chat commands: `q`, `chat`, `send`, `tokens`, `models`, `model`.
//!
//! `q` and `chat` bring the index up to date before answering, the same
//! way `refresh` does, so answers always reflect the files on disk.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::answer::{self, OutputFile};
use crate::chat::{ChatClient, OpenAIChat, KNOWN_MODELS};
use crate::config::Config;
use crate::ingest::{open_store, open_store_readonly, refresh_store};
use crate::models::ChatMessage;
use crate::persist::StoreLock;
use crate::progress::{ProgressMode, WaitIndicator};
use crate::store::Store;

const WAIT_INTERVAL: Duration = Duration::from_secs(1);

async fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .context("Failed to read stdin")?;
    Ok(buf)
}

/// Refresh the index and save it if anything changed.
async fn open_fresh_store(config: &Config, progress: ProgressMode) -> Result<Store> {
    let _lock = StoreLock::acquire(&config.store.path)?;
    let mut store = open_store(config, progress)?;
    if refresh_store(&mut store).await? {
        store.save(&config.store.path)?;
    }
    Ok(store)
}

async fn ask_once(
    store: &Store,
    chat: &dyn ChatClient,
    progress: ProgressMode,
    question: &str,
    global: bool,
) -> Result<String> {
    let indicator = WaitIndicator::start(progress, "Querying the model", WAIT_INTERVAL);
    let result = answer::answer(store, chat, question, global).await;
    indicator.stop().await;
    let answer = result?;
    Ok(answer.response.message.content)
}

/// Answer one question, read from stdin when not given.
pub async fn run_query(
    config: &Config,
    progress: ProgressMode,
    question: Option<String>,
    global: bool,
) -> Result<()> {
    let question = match question {
        Some(q) => q,
        None => read_stdin().await?,
    };
    let question = question.trim();
    if question.is_empty() {
        bail!("No question given");
    }

    let store = open_fresh_store(config, progress).await?;
    let chat = OpenAIChat::from_config(&config.chat)?;
    let reply = ask_once(&store, &chat, progress, question, global).await?;
    println!("{}", reply);
    Ok(())
}

/// Answer questions from stdin, one per line, until end of input.
///
/// Each question is answered independently against the same index.
pub async fn run_chat(config: &Config, progress: ProgressMode, global: bool) -> Result<()> {
    let store = open_fresh_store(config, progress).await?;
    let chat = OpenAIChat::from_config(&config.chat)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        let reply = ask_once(&store, &chat, progress, question, global).await?;
        println!("{}\n", reply);
    }
    Ok(())
}

/// Options for `grok send`.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub sysmsg: String,
    pub prompt: Option<String>,
    pub in_files: Vec<PathBuf>,
    pub out_files: Vec<PathBuf>,
    pub dry_run: bool,
}

/// Send a prompt plus input files and write back the requested output files.
pub async fn run_send(config: &Config, progress: ProgressMode, request: SendRequest) -> Result<()> {
    let prompt = match request.prompt {
        Some(p) => p,
        None => read_stdin().await?,
    };
    let store = open_store_readonly(config)?;
    let chat = OpenAIChat::from_config(&config.chat)?;
    let out_files: Vec<OutputFile> = request.out_files.into_iter().map(OutputFile::new).collect();

    let indicator = WaitIndicator::start(progress, "Sending", WAIT_INTERVAL);
    let result = answer::send_with_files(
        &store,
        &chat,
        &request.sysmsg,
        &[ChatMessage::user(prompt)],
        &request.in_files,
        &out_files,
    )
    .await;
    indicator.stop().await;
    let response = result?;

    println!("{}", response.content());
    let extracted = answer::extract_files(&out_files, response.content(), request.dry_run)?;
    for file in &extracted {
        let verb = if file.written { "wrote" } else { "would write" };
        eprintln!("{} {} ({} bytes)", verb, file.path.display(), file.content.len());
    }
    for wanted in &out_files {
        if !extracted.iter().any(|f| f.path == wanted.path) {
            tracing::warn!("response did not include {}", wanted.path.display());
        }
    }
    Ok(())
}

/// Print the estimated token count of `text` (or stdin).
pub async fn run_tokens(config: &Config, text: Option<String>) -> Result<()> {
    let text = match text {
        Some(t) => t,
        None => read_stdin().await?,
    };
    let store = open_store_readonly(config)?;
    println!("{}", store.token_count(&text));
    Ok(())
}

/// List known chat models, marking the store's current one.
pub fn run_models(config: &Config) -> Result<()> {
    let store = open_store_readonly(config)?;
    for model in KNOWN_MODELS {
        let marker = if model.name == store.model() { "*" } else { " " };
        println!("{} {:<16} {:>7} tokens", marker, model.name, model.context_tokens);
    }
    Ok(())
}

/// Set the store's default chat model.
pub fn run_select_model(config: &Config, name: &str) -> Result<()> {
    let _lock = StoreLock::acquire(&config.store.path)?;
    let mut store = open_store_readonly(config)?;
    store.set_model(name)?;
    store.save(&config.store.path)?;
    println!("model: {}", name);
    Ok(())
}
