use std::path::PathBuf;

use thiserror::Error;

/// A single probe could not reach the target. Always recovered locally:
/// the probe is skipped and the batch continues.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("could not read response body from {url}: {message}")]
    Body { url: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout { url: url.to_string() }
        } else if err.is_body() || err.is_decode() {
            TransportError::Body {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            TransportError::Request {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Session-level failures.
///
/// Only [`ScanError::Invariant`] and [`ScanError::Storage`] are fatal: they mean
/// the dedup structures can no longer guarantee at-most-once reporting, and the
/// session has to stop.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("concurrency invariant violated: {0}")]
    Invariant(String),

    #[error("dedup storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to read candidate list {path}: {source}")]
    Wordlist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist session snapshot: {0}")]
    Snapshot(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ScanError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Invariant(_) | ScanError::Storage(_))
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        ScanError::Invariant(format!("{what} lock poisoned by a panicked worker"))
    }
}
