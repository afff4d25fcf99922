//! Whole-store persistence.
//!
//! The store is one JSON document: read in one step, written in one step.
//! Writes go to a temporary file in the target directory which is then
//! renamed over the store, so readers never observe a partial write.
//! Mutating commands additionally hold a [`StoreLock`] to keep a second
//! writer from interleaving its own load/modify/save cycle.

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::IndexError;
use crate::store::{StoreState, FORMAT_VERSION};

/// Read a persisted store, returning it with the file's modification time.
///
/// # Errors
///
/// I/O failures, [`IndexError::Corrupt`] for undecodable content, or a
/// format version newer than this build understands.
pub fn read_state(path: &Path) -> Result<(StoreState, SystemTime)> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open store file: {}", path.display()))?;
    let modified = file
        .metadata()
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to stat store file: {}", path.display()))?;

    let state: StoreState =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| IndexError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

    if state.version > FORMAT_VERSION {
        bail!(
            "store file {} has format version {}, this build understands up to {}",
            path.display(),
            state.version,
            FORMAT_VERSION
        );
    }

    tracing::debug!(
        "loaded {} documents and {} chunks from {}",
        state.documents.len(),
        state.chunks.len(),
        path.display()
    );
    Ok((state, modified))
}

/// Atomically replace the store file at `path` with `state`.
pub fn write_state(state: &StoreState, path: &Path) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, state)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write store file: {}", path.display()))?;

    tracing::debug!(
        "saved {} documents and {} chunks to {}",
        state.documents.len(),
        state.chunks.len(),
        path.display()
    );
    Ok(())
}

/// Directory holding `path`, with `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Exclusive single-writer lock beside the store file (`<store>.lock`).
///
/// Released when dropped.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// # Errors
    ///
    /// [`IndexError::Locked`] if another process holds the lock.
    pub fn acquire(store_path: &Path) -> Result<Self> {
        let mut name = store_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| ".grok".into());
        name.push(".lock");
        let path = parent_dir(store_path).join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(IndexError::Locked(path).into()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to create lock file: {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document};

    fn sample_state() -> StoreState {
        let mut state = StoreState::new(1024, 3.5, "gpt-4o".to_string(), "fake".to_string());
        state.documents.push(Document::new("a.md"));
        state.chunks.push(Chunk {
            document: "a.md".to_string(),
            text: "hello\nworld".to_string(),
            embedding: vec![0.25, -1.5, 0.1],
        });
        state
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".grok");
        let state = sample_state();
        write_state(&state, &path).unwrap();
        let (loaded, _) = read_state(&path).unwrap();
        assert_eq!(loaded, state);

        write_state(&loaded, &path).unwrap();
        let (again, _) = read_state(&path).unwrap();
        assert_eq!(again, state);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".grok");
        fs::write(&path, "{ not json").unwrap();
        let err = read_state(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_newer_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".grok");
        let mut state = sample_state();
        state.version = FORMAT_VERSION + 1;
        write_state(&state, &path).unwrap();
        assert!(read_state(&path).is_err());
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join(".grok");

        let lock = StoreLock::acquire(&store).unwrap();
        assert!(lock.path().exists());
        let err = StoreLock::acquire(&store).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Locked(_))
        ));

        drop(lock);
        assert!(!dir.path().join(".grok.lock").exists());
        StoreLock::acquire(&store).unwrap();
    }

    #[test]
    fn test_parent_dir_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new(".grok")), Path::new("."));
        assert_eq!(parent_dir(Path::new("a/.grok")), Path::new("a"));
    }
}
