//! # docgrok
//!
//! A local, file-backed semantic index over text and code documents, with
//! retrieval-augmented answers from a remote chat model.
//!
//! Documents are split into paragraph-sized chunks, each chunk is embedded
//! once, and the whole index lives in a single JSON file next to the
//! documents. Re-indexing only embeds text that actually changed. A
//! question is embedded, every chunk is ranked by cosine similarity, and
//! the best chunks are packed into the prompt as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌────────────┐   ┌────────────┐
//! │  ingest   │──▶│  chunk  │──▶│   store    │◀─▶│  persist   │
//! │ walk+glob │   │ paras   │   │ diff + GC  │   │ JSON file  │
//! └───────────┘   └─────────┘   └─────┬──────┘   └────────────┘
//!                                     │ embed_texts
//!                               ┌─────▼──────┐
//!                               │ embedding  │
//!                               └─────┬──────┘
//!                                     │ rank
//!                 ┌──────────┐  ┌─────▼──────┐
//!                 │   chat   │◀─│   answer   │
//!                 └──────────┘  └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! grok init                      # create .grok in the current directory
//! grok add docs/ src/            # index files
//! grok q "how is the cache invalidated?"
//! grok refresh                   # pick up edits
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Paragraph chunking |
//! | [`embedding`] | Embedding providers and batching |
//! | [`store`] | Chunk store, incremental updates, GC |
//! | [`persist`] | Store file I/O and the writer lock |
//! | [`rank`] | Cosine similarity ranking |
//! | [`chat`] | Chat-completion provider |
//! | [`answer`] | Context assembly, answers, file round trips |
//! | [`ingest`] | `init`/`add`/`forget`/`refresh`/`ls` commands |
//! | [`ask`] | `q`/`chat`/`send`/`tokens`/`models`/`model` commands |
//! | [`progress`] | Progress reporting on stderr |
//! | [`retry`] | Backoff for provider requests |
//! | [`error`] | Typed provider and index errors |

pub mod answer;
pub mod ask;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod persist;
pub mod progress;
pub mod rank;
pub mod retry;
pub mod store;
