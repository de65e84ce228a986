//! Error taxonomy shared across the pipeline.
//!
//! Per-link failures (`Fetch`, `RecordExtraction`, `Storage` during an
//! optional PDF save) are caught at the coordinator's task boundary and
//! logged; they never abort sibling links. `Configuration` errors are fatal
//! at startup, before any network activity begins.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Network or HTTP failure while talking to a source or the object store.
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Source content that could not be parsed into a paper record.
    /// Scoped to a single link.
    #[error("record extraction failed for {link}: {reason}")]
    RecordExtraction { link: String, reason: String },

    /// Transactional write failure; the transaction has been rolled back.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Object store upload/download failure.
    #[error("storage error for key {key}: {reason}")]
    Storage { key: String, reason: String },

    /// Embedding model or chunking failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Invalid configuration: unknown conference key, unsupported similarity
    /// metric, bad config file values.
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn fetch(url: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Fetch {
            url: url.into(),
            source,
        }
    }

    pub fn extraction(link: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::RecordExtraction {
            link: link.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Storage {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
