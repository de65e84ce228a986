//! Core data models flowing through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque link reference produced by a connector's `extract_links`.
///
/// `label` identifies the link in logs, `url` is the page (or API object)
/// to fetch, and `raw` optionally carries the source's own record payload so
/// API-backed connectors can avoid a second round trip in `process_link`.
#[derive(Debug, Clone)]
pub struct LinkRef {
    pub label: String,
    pub url: String,
    pub raw: Option<serde_json::Value>,
}

impl LinkRef {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Paper creation payload: everything a connector (or the HTTP API) supplies
/// before the store assigns an id and creation timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperDraft {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub publication_date: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub conference: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A stored paper. `id` is assigned once at creation and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub publication_date: DateTime<Utc>,
    pub url: Option<String>,
    pub abstract_text: Option<String>,
    pub conference: Option<String>,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One embedded slice of a paper's text.
///
/// For any paper, chunk indices form a contiguous `0..N` range after a
/// successful embedding pass; replacement deletes the old set before
/// inserting the new one.
#[derive(Debug, Clone)]
pub struct PaperChunk {
    pub id: String,
    pub paper_id: String,
    pub chunk_index: i64,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A scored query hit. Ephemeral: produced by the retrieval engine, never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchScoreResult {
    pub score: f64,
    pub paper: Paper,
}
