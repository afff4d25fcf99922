//! Index progress reporting and the wait indicator.
//!
//! Reports observable progress while documents are (re)indexed so users
//! see what is being embedded and what was dropped. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A single progress event emitted by the store or the ingestion driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// A document is being chunked and diffed (`n` of `total`).
    Updating { path: String, n: u64, total: u64 },
    /// New segments of a document are being embedded.
    Embedding { path: String, segments: u64 },
    /// A document vanished from disk and was dropped from the index.
    Removed { path: String },
    /// GC reclaimed orphaned chunks.
    Collected { chunks: u64 },
}

/// Reports index progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  updating  12 / 340  src/lib.rs".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Updating { path, n, total } => format!(
                "index  updating  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                path
            ),
            IndexProgressEvent::Embedding { path, segments } => {
                format!("index  embedding  {} segments  {}\n", format_number(*segments), path)
            }
            IndexProgressEvent::Removed { path } => format!("index  removed  {}\n", path),
            IndexProgressEvent::Collected { chunks } => {
                format!("index  collected  {} chunks\n", format_number(*chunks))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Updating { path, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "updating",
                "path": path,
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Embedding { path, segments } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "path": path,
                "segments": segments
            }),
            IndexProgressEvent::Removed { path } => serde_json::json!({
                "event": "progress",
                "phase": "removed",
                "path": path
            }),
            IndexProgressEvent::Collected { chunks } => serde_json::json!({
                "event": "progress",
                "phase": "collected",
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Prints a dot to stderr every interval while a long request is in flight.
///
/// The indicator only updates the display; it never touches the request
/// it is waiting on. Dropping it without calling [`stop`](Self::stop)
/// aborts the ticker task.
pub struct WaitIndicator {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    started: Instant,
}

impl WaitIndicator {
    /// Start ticking if `mode` is [`ProgressMode::Human`]; otherwise only time.
    pub fn start(mode: ProgressMode, label: &str, interval: Duration) -> Self {
        let started = Instant::now();
        if mode != ProgressMode::Human {
            return Self {
                stop: None,
                task: None,
                started,
            };
        }

        let _ = write!(std::io::stderr().lock(), "{}", label);
        let (tx, mut rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        let mut err = std::io::stderr().lock();
                        let _ = write!(err, ".");
                        let _ = err.flush();
                    }
                }
            }
        });

        Self {
            stop: Some(tx),
            task: Some(task),
            started,
        }
    }

    /// Stop ticking and return the elapsed time.
    pub async fn stop(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
            let _ = writeln!(std::io::stderr().lock(), " got response in {:.1?}", elapsed);
        }
        elapsed
    }
}

impl Drop for WaitIndicator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
