//! OpenReview connector for ICLR volumes.
//!
//! Queries the OpenReview v2 API for all notes with
//! `content.venueid = ICLR.cc/{volume}/Conference`, paginating by
//! offset/limit. The full note payload is carried on each [`LinkRef`], so
//! `process_link` is a pure mapping with no second network round trip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::connector::{http_client, SourceConnector};
use crate::error::{Error, Result};
use crate::models::{LinkRef, PaperDraft};

const BASE_URL: &str = "https://api2.openreview.net";
const FORUM_URL: &str = "https://openreview.net";

#[derive(Debug)]
pub struct OpenReviewConnector {
    volume: String,
    base_url: String,
    forum_url: String,
    page_size: usize,
    client: reqwest::Client,
}

impl OpenReviewConnector {
    pub fn new(volume: &str, timeout: Duration, page_size: usize) -> Result<Self> {
        Self::with_base_url(volume, timeout, page_size, BASE_URL, FORUM_URL)
    }

    pub fn with_base_url(
        volume: &str,
        timeout: Duration,
        page_size: usize,
        base_url: &str,
        forum_url: &str,
    ) -> Result<Self> {
        if volume.is_empty() {
            return Err(Error::Configuration(
                "OpenReview volume must not be empty".to_string(),
            ));
        }
        Ok(Self {
            volume: volume.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            forum_url: forum_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
            client: http_client(timeout)?,
        })
    }

    fn venue_id(&self) -> String {
        format!("ICLR.cc/{}/Conference", self.volume)
    }

    /// Pull `content.title.value`-style nested fields out of a note.
    fn content_value<'a>(note: &'a serde_json::Value, field: &str) -> Option<&'a serde_json::Value> {
        note.get("content")?.get(field)?.get("value")
    }
}

#[async_trait]
impl SourceConnector for OpenReviewConnector {
    fn conference(&self) -> &str {
        "ICLR"
    }

    async fn extract_links(&self) -> Result<Vec<LinkRef>> {
        let venue = self.venue_id();
        tracing::info!(venue = %venue, "fetching OpenReview submissions");

        let mut links = Vec::new();
        let mut offset = 0usize;

        loop {
            let url = format!(
                "{}/notes?content.venueid={}&limit={}&offset={}",
                self.base_url, venue, self.page_size, offset
            );
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| Error::fetch(&url, e))?;
            let resp = resp.error_for_status().map_err(|e| Error::fetch(&url, e))?;
            let page: serde_json::Value =
                resp.json().await.map_err(|e| Error::fetch(&url, e))?;

            let notes = page
                .get("notes")
                .and_then(|n| n.as_array())
                .ok_or_else(|| Error::extraction(&url, "response missing notes array"))?;

            for note in notes {
                let id = note
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string();
                let label = Self::content_value(note, "title")
                    .and_then(|t| t.as_str())
                    .unwrap_or(&id)
                    .to_string();
                links.push(
                    LinkRef::new(label, format!("{}/forum?id={}", self.forum_url, id))
                        .with_raw(note.clone()),
                );
            }

            if notes.len() < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        Ok(links)
    }

    async fn process_link(&self, link: &LinkRef) -> Result<PaperDraft> {
        let note = link
            .raw
            .as_ref()
            .ok_or_else(|| Error::extraction(&link.url, "link carries no note payload"))?;

        tracing::info!(note = %link.label, "processing OpenReview note");

        let title = Self::content_value(note, "title")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::extraction(&link.url, "note missing title"))?;

        let authors = Self::content_value(note, "authors")
            .and_then(|a| a.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let abstract_text = Self::content_value(note, "abstract")
            .and_then(|a| a.as_str())
            .map(str::to_string)
            .filter(|a| !a.is_empty());

        let keywords = Self::content_value(note, "keywords")
            .and_then(|k| k.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let pdf_url = Self::content_value(note, "pdf")
            .and_then(|p| p.as_str())
            .map(|p| format!("{}{}", self.forum_url, p));

        // tmdate (last modification) preferred, cdate as fallback; both are
        // epoch milliseconds.
        let publication_date = note
            .get("tmdate")
            .or_else(|| note.get("cdate"))
            .and_then(|t| t.as_i64())
            .and_then(millis_to_datetime)
            .ok_or_else(|| Error::extraction(&link.url, "note missing tmdate/cdate"))?;

        Ok(PaperDraft {
            title,
            authors,
            publication_date,
            url: pdf_url,
            abstract_text,
            conference: Some("ICLR".to_string()),
            keywords,
        })
    }
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
