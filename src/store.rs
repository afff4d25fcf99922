//! The chunk store: documents, their embedded chunks, and incremental
//! re-indexing.
//!
//! # Update algorithm
//!
//! [`Store::update_document`] re-chunks a document and diffs the segments
//! against the document's current chunks by exact text:
//!
//! 1. A segment whose text already has a chunk keeps that chunk (and its
//!    embedding) untouched.
//! 2. A chunk whose text no longer appears is detached and left for GC.
//! 3. Every remaining segment is new; all new segments of one update are
//!    embedded in a single [`embed_texts`] call.
//!
//! Nothing is modified until embedding succeeds, so a failed update leaves
//! the store exactly as it was. The diff is positional-insensitive:
//! reordering paragraphs costs nothing, editing one re-embeds only the
//! segments derived from it.
//!
//! # Garbage collection
//!
//! [`Store::gc`] drops every chunk whose document is no longer in the
//! store (including detached chunks). It never runs implicitly on plain
//! mutations; [`Store::update_embeddings`] ends with one.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::chat::{lookup_model, KNOWN_MODELS};
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{embed_query, embed_texts, BatchOptions, Embedder};
use crate::error::IndexError;
use crate::models::{Chunk, Document};
use crate::persist;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::rank::{rank_chunks, ScoredChunk};

/// Current persisted format version.
pub const FORMAT_VERSION: u32 = 1;

fn default_version() -> u32 {
    FORMAT_VERSION
}

fn default_indexed_at() -> SystemTime {
    SystemTime::UNIX_EPOCH
}

/// Everything that is persisted: documents, chunks, and per-store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
    /// Character budget per chunk; also drives the answer context budget.
    pub max_chunk_size: usize,
    /// Approximate characters per token, until a real tokenizer is used.
    pub chars_per_token: f64,
    /// Default chat model.
    pub model: String,
    /// Model that produced every stored embedding.
    pub embedding_model: String,
    /// Start of the last pass that brought every document up to date.
    /// Files modified after this are re-indexed by the next refresh.
    #[serde(default = "default_indexed_at")]
    pub indexed_at: SystemTime,
}

impl StoreState {
    pub fn new(
        max_chunk_size: usize,
        chars_per_token: f64,
        model: String,
        embedding_model: String,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            documents: Vec::new(),
            chunks: Vec::new(),
            max_chunk_size,
            chars_per_token,
            model,
            embedding_model,
            indexed_at: SystemTime::now(),
        }
    }
}

/// Settings used when creating a fresh store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_chunk_size: usize,
    pub chars_per_token: f64,
    pub model: String,
    pub batch: BatchOptions,
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chunk_size: config.chunking.max_chunk_size,
            chars_per_token: config.chunking.chars_per_token,
            model: config.chat.model.clone(),
            batch: BatchOptions::from_config(&config.embedding),
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A loaded or freshly created index with its embedding client.
///
/// The store is the single point of mutation; callers that share it
/// across tasks must serialize mutating calls themselves.
pub struct Store {
    state: StoreState,
    embedder: Arc<dyn Embedder>,
    batch: BatchOptions,
    progress: Arc<dyn IndexProgressReporter>,
    root: PathBuf,
    saved_at: Option<SystemTime>,
}

impl Store {
    /// Create an empty store whose document paths resolve against `root`.
    pub fn create(root: &Path, embedder: Arc<dyn Embedder>, options: &StoreOptions) -> Self {
        let state = StoreState::new(
            options.max_chunk_size,
            options.chars_per_token,
            options.model.clone(),
            embedder.model_name().to_string(),
        );
        Self::from_state(root, state, embedder, options.batch)
    }

    /// Wrap an existing state.
    pub fn from_state(
        root: &Path,
        state: StoreState,
        embedder: Arc<dyn Embedder>,
        batch: BatchOptions,
    ) -> Self {
        Self {
            state,
            embedder,
            batch,
            progress: Arc::new(NoProgress),
            root: canonical_or_self(root),
            saved_at: None,
        }
    }

    /// Load the store persisted at `path`; documents resolve against its directory.
    pub fn load(path: &Path, embedder: Arc<dyn Embedder>, batch: BatchOptions) -> Result<Self> {
        let (state, modified) = persist::read_state(path)?;
        let mut store = Self::from_state(persist::parent_dir(path), state, embedder, batch);
        store.saved_at = Some(modified);
        Ok(store)
    }

    /// Persist the whole store to `path`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        persist::write_state(&self.state, path)?;
        self.saved_at = fs::metadata(path).and_then(|m| m.modified()).ok();
        Ok(())
    }

    pub fn with_progress(mut self, progress: Arc<dyn IndexProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Modification time of the store file as of the last load or save.
    pub fn saved_at(&self) -> Option<SystemTime> {
        self.saved_at
    }

    /// Documents modified after this time have not been re-indexed yet.
    pub fn indexed_at(&self) -> SystemTime {
        self.state.indexed_at
    }

    pub fn documents(&self) -> &[Document] {
        &self.state.documents
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.state.chunks
    }

    pub fn document(&self, path: &str) -> Option<&Document> {
        self.state.documents.iter().find(|d| d.path == path)
    }

    pub fn document_chunks<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.state.chunks.iter().filter(move |c| c.document == path)
    }

    pub fn max_chunk_size(&self) -> usize {
        self.state.max_chunk_size
    }

    pub fn chars_per_token(&self) -> f64 {
        self.state.chars_per_token
    }

    pub fn model(&self) -> &str {
        &self.state.model
    }

    /// Select the default chat model.
    pub fn set_model(&mut self, name: &str) -> Result<()> {
        if lookup_model(name).is_none() {
            let known: Vec<&str> = KNOWN_MODELS.iter().map(|m| m.name).collect();
            bail!(
                "Unknown model: '{}'. Known models: {}",
                name,
                known.join(", ")
            );
        }
        self.state.model = name.to_string();
        Ok(())
    }

    /// Estimated token count of `text` using the store's chars-per-token ratio.
    pub fn token_count(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.state.chars_per_token).ceil() as usize
    }

    /// Filesystem location of a document path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn check_embedder(&self) -> Result<()> {
        let configured = self.embedder.model_name();
        if self.state.embedding_model != configured && !self.state.chunks.is_empty() {
            return Err(IndexError::ModelMismatch {
                stored: self.state.embedding_model.clone(),
                configured: configured.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Register `path` if absent, then index it.
    ///
    /// Calling this again for the same path only picks up content changes.
    /// If indexing fails, a newly registered document is unregistered.
    pub async fn add_document(&mut self, path: &str) -> Result<bool> {
        let registered = self.document(path).is_none();
        if registered {
            self.state.documents.push(Document::new(path));
        }
        match self.update_document(path).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                if registered {
                    self.remove_document(path);
                }
                Err(e)
            }
        }
    }

    /// Drop the document entry. Its chunks stay until the next [`gc`](Self::gc).
    pub fn remove_document(&mut self, path: &str) -> bool {
        let before = self.state.documents.len();
        self.state.documents.retain(|d| d.path != path);
        before != self.state.documents.len()
    }

    /// Remove every chunk not owned by a current document. Returns the count.
    pub fn gc(&mut self) -> usize {
        let live: HashSet<&str> = self
            .state
            .documents
            .iter()
            .map(|d| d.path.as_str())
            .collect();
        let before = self.state.chunks.len();
        self.state.chunks.retain(|c| live.contains(c.document.as_str()));
        let collected = before - self.state.chunks.len();
        tracing::debug!("garbage collected {} chunks", collected);
        if collected > 0 {
            self.progress.report(IndexProgressEvent::Collected {
                chunks: collected as u64,
            });
        }
        collected
    }

    /// Re-chunk `path` and embed whatever text is new.
    ///
    /// Returns whether any new segment was found.
    ///
    /// # Errors
    ///
    /// Any read failure (including a missing file) or embedding failure;
    /// the store is unchanged in that case.
    pub async fn update_document(&mut self, path: &str) -> Result<bool> {
        self.check_embedder()?;

        let file_path = self.resolve(path);
        let bytes = fs::read(&file_path)
            .with_context(|| format!("Failed to read document: {}", file_path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        if matches!(text, Cow::Owned(_)) {
            tracing::warn!("{} is not valid UTF-8, indexing it lossily", path);
        }
        let candidates = chunk_text(&text, self.state.max_chunk_size);

        let mut stale: Vec<usize> = self
            .state
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.document == path)
            .map(|(i, _)| i)
            .collect();
        tracing::debug!("{}: {} existing chunks", path, stale.len());

        let mut seen: HashSet<&str> = HashSet::new();
        let mut new_texts: Vec<String> = Vec::new();
        for candidate in &candidates {
            if !seen.insert(candidate.as_str()) {
                continue;
            }
            let existing = stale
                .iter()
                .position(|&i| self.state.chunks[i].text == *candidate);
            match existing {
                Some(pos) => {
                    stale.swap_remove(pos);
                }
                None => new_texts.push(candidate.clone()),
            }
        }
        tracing::debug!(
            "{}: {} new chunks, {} stale chunks",
            path,
            new_texts.len(),
            stale.len()
        );

        if !new_texts.is_empty() {
            self.progress.report(IndexProgressEvent::Embedding {
                path: path.to_string(),
                segments: new_texts.len() as u64,
            });
        }
        let embeddings = embed_texts(self.embedder.as_ref(), &new_texts, &self.batch).await?;
        self.check_dimensions(&embeddings)?;

        // Commit: nothing above has touched the store.
        for &i in &stale {
            self.state.chunks[i].detach();
        }
        let updated = !new_texts.is_empty();
        if updated && self.state.chunks.is_empty() {
            self.state.embedding_model = self.embedder.model_name().to_string();
        }
        self.state.chunks.extend(
            new_texts
                .into_iter()
                .zip(embeddings)
                .map(|(text, embedding)| Chunk {
                    document: path.to_string(),
                    text,
                    embedding,
                }),
        );

        Ok(updated)
    }

    fn check_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        let Some(expected) = self.state.chunks.first().map(|c| c.embedding.len()) else {
            return Ok(());
        };
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                found: bad.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Bring the index up to date with the filesystem.
    ///
    /// Documents modified after `since` are re-indexed; documents missing
    /// on disk are removed. Ends with a GC pass. Returns whether anything
    /// changed, i.e. whether the store should be saved.
    ///
    /// A successful pass moves [`indexed_at`](Self::indexed_at) to the
    /// time the pass started.
    ///
    /// # Errors
    ///
    /// Any filesystem error other than not-found, and any embedding error,
    /// aborts the pass.
    pub async fn update_embeddings(&mut self, since: SystemTime) -> Result<bool> {
        let started = SystemTime::now();
        let paths: Vec<String> = self
            .state
            .documents
            .iter()
            .map(|d| d.path.clone())
            .collect();
        let total = paths.len() as u64;
        let mut changed = false;

        for (n, path) in paths.iter().enumerate() {
            let file_path = self.resolve(path);
            let modified = match fs::metadata(&file_path) {
                Ok(meta) => meta.modified().with_context(|| {
                    format!("Failed to stat document: {}", file_path.display())
                })?,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!("{} is gone, removing", path);
                    self.remove_document(path);
                    self.progress
                        .report(IndexProgressEvent::Removed { path: path.clone() });
                    changed = true;
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to stat document: {}", file_path.display())
                    })
                }
            };

            if modified > since {
                self.progress.report(IndexProgressEvent::Updating {
                    path: path.clone(),
                    n: n as u64 + 1,
                    total,
                });
                let updated = self.update_document(path).await?;
                changed = changed || updated;
            }
        }

        let collected = self.gc();
        self.state.indexed_at = started;
        Ok(changed || collected > 0)
    }

    /// Re-index every document regardless of modification time, then GC.
    pub async fn refresh_embeddings(&mut self) -> Result<bool> {
        let started = SystemTime::now();
        let paths: Vec<String> = self
            .state
            .documents
            .iter()
            .map(|d| d.path.clone())
            .collect();
        let total = paths.len() as u64;
        let mut changed = false;
        for (n, path) in paths.iter().enumerate() {
            self.progress.report(IndexProgressEvent::Updating {
                path: path.clone(),
                n: n as u64 + 1,
                total,
            });
            let updated = self.update_document(path).await?;
            changed = changed || updated;
        }
        let collected = self.gc();
        self.state.indexed_at = started;
        Ok(changed || collected > 0)
    }

    /// Discard every embedding and re-embed all documents with the current
    /// embedder. Used after switching embedding models.
    ///
    /// On failure the previous chunks are restored.
    pub async fn rebuild_embeddings(&mut self) -> Result<()> {
        let previous_chunks = std::mem::take(&mut self.state.chunks);
        let previous_model = std::mem::replace(
            &mut self.state.embedding_model,
            self.embedder.model_name().to_string(),
        );
        if let Err(e) = self.refresh_embeddings().await {
            self.state.chunks = previous_chunks;
            self.state.embedding_model = previous_model;
            return Err(e);
        }
        Ok(())
    }

    /// Chunks whose document is still in the store.
    pub fn live_chunks(&self) -> impl Iterator<Item = &Chunk> {
        let live: HashSet<&str> = self
            .state
            .documents
            .iter()
            .map(|d| d.path.as_str())
            .collect();
        self.state
            .chunks
            .iter()
            .filter(move |c| live.contains(c.document.as_str()))
    }

    /// Rank live chunks against `embedding`; `k == 0` returns all of them.
    pub fn similar_chunks(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk<'_>>> {
        self.check_embedder()?;
        rank_chunks(embedding, self.live_chunks(), k)
    }

    /// Embed `query` and return the `k` most relevant chunks (`0` = all).
    pub async fn find_chunks(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk<'_>>> {
        self.check_embedder()?;
        let embedding = embed_query(self.embedder.as_ref(), query).await?;
        self.similar_chunks(&embedding, k)
    }
}

fn canonical_or_self(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
