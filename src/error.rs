//! Typed errors for the remote-API boundary and the index itself.
//!
//! Most of the crate works in `anyhow::Result`; these enums exist where a
//! caller needs to tell kinds apart (retry decisions, integrity failures).
//! They travel inside `anyhow::Error` and can be recovered with
//! `downcast_ref`.

use std::path::PathBuf;

/// Failure talking to an embedding or chat provider.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error {status}: {body}")]
    Status {
        provider: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{provider} rate limited")]
    RateLimited { provider: &'static str },

    #[error("invalid {provider} response: {detail}")]
    InvalidResponse {
        provider: &'static str,
        detail: String,
    },

    #[error("{provider} returned {got} embeddings for {expected} inputs")]
    CountMismatch {
        provider: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },
}

impl ApiError {
    /// Transient failures worth another attempt: network errors, 429, 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            ApiError::Status { status, .. } => status.is_server_error(),
            ApiError::RateLimited { .. } => true,
            ApiError::InvalidResponse { .. }
            | ApiError::CountMismatch { .. }
            | ApiError::EmptyResponse { .. } => false,
        }
    }
}

/// Integrity failures of the index; never silently coerced.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error(
        "store was built with embedding model '{stored}' but '{configured}' is configured; \
         run `grok refresh --full` after switching models"
    )]
    ModelMismatch { stored: String, configured: String },

    #[error("corrupt store file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store is locked by another process (remove {} if stale)", .0.display())]
    Locked(PathBuf),
}
