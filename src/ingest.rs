//! Index maintenance commands: `init`, `add`, `forget`, `refresh`, `ls`.
//!
//! Paths given on the command line are resolved to document keys relative
//! to the store root (the directory holding the store file). Directories
//! are walked with include/exclude globs; the store file itself and its
//! lock are never indexed. Every mutating command holds the [`StoreLock`]
//! for its whole load/modify/save cycle.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::{Config, IngestConfig};
use crate::embedding::{create_embedder, BatchOptions, DisabledEmbedder, Embedder};
use crate::persist::{self, StoreLock};
use crate::progress::ProgressMode;
use crate::store::{Store, StoreOptions};

/// Open the configured store with the configured embedder.
pub fn open_store(config: &Config, progress: ProgressMode) -> Result<Store> {
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    open_store_with(config, embedder, progress)
}

/// Open the configured store for commands that never embed.
pub fn open_store_readonly(config: &Config) -> Result<Store> {
    open_store_with(config, Arc::new(DisabledEmbedder), ProgressMode::Off)
}

/// Open the configured store with an explicit embedder.
pub fn open_store_with(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    progress: ProgressMode,
) -> Result<Store> {
    let path = &config.store.path;
    if !path.exists() {
        bail!("No index at {}. Run `grok init` first.", path.display());
    }
    let store = Store::load(path, embedder, BatchOptions::from_config(&config.embedding))?;
    Ok(store.with_progress(Arc::from(progress.reporter())))
}

/// Create an empty store file.
pub fn run_init(config: &Config, force: bool) -> Result<()> {
    let path = &config.store.path;
    if path.exists() && !force {
        bail!(
            "Index already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    let _lock = StoreLock::acquire(path)?;
    let root = persist::parent_dir(path);
    // The first commit adopts the real embedding model.
    let mut store = Store::create(
        root,
        Arc::new(DisabledEmbedder),
        &StoreOptions::from_config(config),
    );
    store.save(path)?;
    println!("Initialized empty index at {}", path.display());
    Ok(())
}

/// Add files (or directories, walked) to the index and embed them.
pub async fn run_add(config: &Config, progress: ProgressMode, paths: &[PathBuf]) -> Result<()> {
    let _lock = StoreLock::acquire(&config.store.path)?;
    let mut store = open_store(config, progress)?;

    let files = collect_files(&config.ingest, &config.store.path, paths)?;
    let total = files.len();
    let mut updated = 0usize;
    for file in &files {
        let key = document_key(store.root(), file)?;
        tracing::debug!("adding {}", key);
        if store.add_document(&key).await? {
            updated += 1;
        }
        // Save after each document so an interrupted add keeps its progress.
        store.save(&config.store.path)?;
    }

    println!("add");
    println!("  documents: {}", total);
    println!("  embedded:  {}", updated);
    println!("  indexed:   {}", store.documents().len());
    println!("ok");
    Ok(())
}

/// Remove documents (or every document under a directory) and GC.
pub fn run_forget(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let _lock = StoreLock::acquire(&config.store.path)?;
    let mut store = open_store_readonly(config)?;

    let mut removed = 0usize;
    for path in paths {
        let key = document_key(store.root(), path)?;
        let matching: Vec<String> = store
            .documents()
            .iter()
            .filter(|d| d.path == key || is_under(&d.path, &key))
            .map(|d| d.path.clone())
            .collect();
        if matching.is_empty() {
            tracing::warn!("not in index: {}", path.display());
        }
        for doc in matching {
            store.remove_document(&doc);
            removed += 1;
        }
    }
    let collected = store.gc();
    store.save(&config.store.path)?;

    println!("forget");
    println!("  documents removed: {}", removed);
    println!("  chunks collected:  {}", collected);
    println!("ok");
    Ok(())
}

/// Re-index modified documents, or every document with `full`.
///
/// A full refresh discards all embeddings first, which is how a store
/// moves to a different embedding model.
pub async fn run_refresh(config: &Config, progress: ProgressMode, full: bool) -> Result<()> {
    let _lock = StoreLock::acquire(&config.store.path)?;
    let mut store = open_store(config, progress)?;

    let changed = if full {
        store.rebuild_embeddings().await?;
        true
    } else {
        refresh_store(&mut store).await?
    };
    if changed {
        store.save(&config.store.path)?;
    }

    println!("refresh{}", if full { " (full)" } else { "" });
    println!("  documents: {}", store.documents().len());
    println!("  chunks:    {}", store.chunks().len());
    println!("  {}", if changed { "saved" } else { "up to date" });
    Ok(())
}

/// Re-index documents modified since the last completed re-index.
///
/// Saves that do not re-index (`add`, `forget`, `model`) leave the mark
/// where it was, so edits made before them are still picked up.
pub async fn refresh_store(store: &mut Store) -> Result<bool> {
    let since = store.indexed_at();
    store.update_embeddings(since).await
}

/// Print every indexed document with its chunk count and modification time.
pub fn run_list(config: &Config) -> Result<()> {
    let store = open_store_readonly(config)?;
    if store.documents().is_empty() {
        println!("No documents indexed.");
        return Ok(());
    }

    for doc in store.documents() {
        let chunks = store.document_chunks(&doc.path).count();
        let modified = std::fs::metadata(store.resolve(&doc.path))
            .and_then(|m| m.modified())
            .map(|t| {
                DateTime::<Local>::from(t)
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|_| "missing".to_string());
        println!("{:<16}  {:>4} chunks  {}", modified, chunks, doc.path);
    }
    Ok(())
}

/// Document key for `path`: relative to `root` when under it, else absolute.
pub fn document_key(root: &Path, path: &Path) -> Result<String> {
    let absolute = match std::fs::canonicalize(path) {
        Ok(p) => p,
        // A forgotten file may already be gone; resolve it lexically.
        Err(_) if path.is_absolute() => path.to_path_buf(),
        Err(_) => std::env::current_dir()
            .context("Failed to read current directory")?
            .join(path),
    };
    let key = absolute.strip_prefix(root).unwrap_or(&absolute);
    Ok(key.to_string_lossy().to_string())
}

fn is_under(doc: &str, dir: &str) -> bool {
    Path::new(doc).starts_with(dir) && doc != dir
}

/// Expand `paths` into the files to index.
///
/// Files named explicitly are taken as-is; directories are walked and
/// filtered by the include/exclude globs, and walked files that are not
/// UTF-8 text are skipped with a warning. The result is sorted and free of
/// duplicates.
pub fn collect_files(
    ingest: &IngestConfig,
    store_path: &Path,
    paths: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&ingest.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(ingest.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let store_file = std::fs::canonicalize(store_path).ok();
    let is_store_file = |p: &Path| -> bool {
        let Some(store_file) = &store_file else {
            return false;
        };
        let Ok(canonical) = std::fs::canonicalize(p) else {
            return false;
        };
        if canonical == *store_file {
            return true;
        }
        let mut lock = store_file.clone().into_os_string();
        lock.push(".lock");
        canonical.as_os_str() == lock
    };

    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            bail!("No such file or directory: {}", path.display());
        }
        if path.is_file() {
            if !is_store_file(path) {
                files.push(path.clone());
            }
            continue;
        }

        let walker = WalkDir::new(path).follow_links(ingest.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file = entry.path();
            let relative = file.strip_prefix(path).unwrap_or(file);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            if is_store_file(file) {
                continue;
            }
            if !is_text_file(file)? {
                tracing::warn!("skipping {}: not UTF-8 text", file.display());
                continue;
            }
            files.push(file.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn is_text_file(path: &Path) -> Result<bool> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(std::str::from_utf8(&bytes).is_ok())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
