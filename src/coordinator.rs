//! Crawl coordination: fan links out across a bounded pool and drive each
//! one through fetch → persist → (upload) → embed → replace-chunks.
//!
//! Each link's pipeline runs independently; completions are collected as
//! they arrive, not in discovery order. A failure at any step moves only
//! that link to the failed count, is logged with the paper title/link, and
//! never cancels in-flight siblings. There is no retry: a failed link is
//! reported and the batch moves on.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ChunkingConfig, CrawlConfig};
use crate::connector::SourceConnector;
use crate::embedding::{embed_abstract, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{LinkRef, PaperDraft};
use crate::object_store::ObjectStore;
use crate::store::PaperStore;

/// Counters surfaced after a crawl run.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrawlReport {
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

pub struct CrawlCoordinator {
    connector: Arc<dyn SourceConnector>,
    store: Arc<PaperStore>,
    provider: Arc<dyn EmbeddingProvider>,
    objects: Option<Arc<ObjectStore>>,
    max_chars: usize,
    workers: usize,
    save_pdf: bool,
    http: reqwest::Client,
}

impl CrawlCoordinator {
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        store: Arc<PaperStore>,
        provider: Arc<dyn EmbeddingProvider>,
        objects: Option<Arc<ObjectStore>>,
        crawl: &CrawlConfig,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(crawl.fetch_timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            connector,
            store,
            provider,
            objects,
            max_chars: chunking.max_chars,
            workers: crawl.workers.max(1),
            save_pdf: crawl.save_pdf,
            http,
        })
    }

    /// Crawl one volume: discover links, then run every link's pipeline
    /// with at most `workers` in flight.
    ///
    /// Link discovery failure is the only error that aborts the run; at
    /// that point nothing has been submitted. Per-link failures are
    /// absorbed into the report.
    pub async fn crawl(&self, limit: Option<usize>) -> Result<CrawlReport> {
        let mut links = self.connector.extract_links().await?;
        if let Some(limit) = limit {
            links.truncate(limit);
        }

        let mut report = CrawlReport {
            discovered: links.len(),
            ..Default::default()
        };

        tracing::info!(
            conference = self.connector.conference(),
            links = links.len(),
            workers = self.workers,
            "starting crawl"
        );

        let mut outcomes = stream::iter(links.into_iter().map(|link| {
            let label = link.label.clone();
            let url = link.url.clone();
            async move { (label, url, self.process_one(&link).await) }
        }))
        .buffer_unordered(self.workers);

        while let Some((label, url, outcome)) = outcomes.next().await {
            match outcome {
                Ok(chunks) => {
                    report.succeeded += 1;
                    report.chunks_written += chunks;
                    tracing::info!(title = %label, chunks, "link ingested");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(title = %label, link = %url, error = %e, "link pipeline failed");
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            chunks = report.chunks_written,
            "crawl finished"
        );

        Ok(report)
    }

    /// One link's pipeline, strictly sequential:
    /// fetch → persist → (upload) → embed abstract → replace chunks.
    /// Returns the number of chunks written.
    async fn process_one(&self, link: &LinkRef) -> Result<usize> {
        let draft = self.connector.process_link(link).await?;

        let paper = self.store.create(&draft).await?;

        if self.save_pdf {
            if let Some(objects) = &self.objects {
                self.save_pdf_for(objects, &paper.id, &draft).await?;
            }
        }

        // Embed the abstract, not the full PDF: the abstract carries the
        // semantic signal at a fraction of the cost.
        let abstract_text = draft.abstract_text.as_deref().unwrap_or("");
        let vectors = embed_abstract(self.provider.as_ref(), self.max_chars, abstract_text).await?;
        let chunks = self.store.replace_embeddings(&paper.id, &vectors).await?;

        Ok(chunks.len())
    }

    /// Download and store the PDF. A missing URL, failed download, or
    /// non-PDF payload is a logged warning; only an object-store write
    /// failure fails the link.
    async fn save_pdf_for(
        &self,
        objects: &ObjectStore,
        paper_id: &str,
        draft: &PaperDraft,
    ) -> Result<()> {
        let Some(url) = draft.url.as_deref() else {
            tracing::warn!(title = %draft.title, "no PDF URL on record; skipping upload");
            return Ok(());
        };

        let bytes = match self.download_pdf(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(title = %draft.title, error = %e, "PDF download failed; skipping upload");
                return Ok(());
            }
        };

        let key = ObjectStore::pdf_key(paper_id);
        let stored = objects.upload(&key, &bytes).await?;
        if stored {
            tracing::info!(title = %draft.title, key, "stored PDF");
        }
        Ok(())
    }

    async fn download_pdf(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e))?;
        let resp = resp.error_for_status().map_err(|e| Error::fetch(url, e))?;
        let bytes = resp.bytes().await.map_err(|e| Error::fetch(url, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimilarityMetric;
    use crate::migrate;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    /// Deterministic stand-in for a real embedding model: one 4-dim vector
    /// per text, derived from the text length.
    struct MockEmbedder;

    #[async_trait]
    impl EmbeddingProvider for MockEmbedder {
        fn model_name(&self) -> &str {
            "mock"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let n = t.chars().count() as f32;
                    vec![n, n / 2.0, 1.0, 0.0]
                })
                .collect())
        }
    }

    /// Three links; the one whose label contains "broken" fails extraction.
    #[derive(Debug)]
    struct MockConnector;

    #[async_trait]
    impl SourceConnector for MockConnector {
        fn conference(&self) -> &str {
            "MockConf"
        }

        async fn extract_links(&self) -> Result<Vec<LinkRef>> {
            Ok(vec![
                LinkRef::new("Paper One", "http://example.test/1"),
                LinkRef::new("broken paper", "http://example.test/2"),
                LinkRef::new("Paper Three", "http://example.test/3"),
            ])
        }

        async fn process_link(&self, link: &LinkRef) -> Result<PaperDraft> {
            if link.label.contains("broken") {
                return Err(Error::extraction(&link.url, "malformed paper page"));
            }
            Ok(PaperDraft {
                title: link.label.clone(),
                authors: vec!["Test Author".to_string()],
                publication_date: Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(),
                url: None,
                abstract_text: Some("A short abstract about learning.".to_string()),
                conference: Some("MockConf".to_string()),
                keywords: Vec::new(),
            })
        }
    }

    async fn test_store() -> Arc<PaperStore> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Arc::new(PaperStore::new(pool))
    }

    fn coordinator(store: Arc<PaperStore>, workers: usize) -> CrawlCoordinator {
        let crawl = CrawlConfig {
            workers,
            ..Default::default()
        };
        CrawlCoordinator::new(
            Arc::new(MockConnector),
            store,
            Arc::new(MockEmbedder),
            None,
            &crawl,
            &ChunkingConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn failed_link_does_not_affect_siblings() {
        let store = test_store().await;
        let report = coordinator(store.clone(), 3).crawl(None).await.unwrap();

        assert_eq!(report.discovered, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);

        let papers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(papers, 2);

        // No orphaned chunks: every chunk belongs to a persisted paper.
        let orphans: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM paper_chunks WHERE paper_id NOT IN (SELECT id FROM papers)",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn successful_links_get_embedded_chunks() {
        let store = test_store().await;
        let report = coordinator(store.clone(), 2).crawl(None).await.unwrap();

        assert_eq!(report.chunks_written, 2); // one chunk per short abstract

        let results = store
            .similarity_search(&[32.0, 16.0, 1.0, 0.0], 5, SimilarityMetric::Cosine)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn limit_truncates_discovered_links() {
        let store = test_store().await;
        let report = coordinator(store.clone(), 2).crawl(Some(1)).await.unwrap();

        assert_eq!(report.discovered, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn rerun_converges_chunk_state() {
        let store = test_store().await;
        let coordinator = coordinator(store.clone(), 2);
        coordinator.crawl(None).await.unwrap();
        coordinator.crawl(None).await.unwrap();

        // Metadata rows duplicate across runs (create is not idempotent),
        // but every paper's chunk set stays contiguous from 0.
        let bad_first_index: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (SELECT paper_id, MIN(chunk_index) AS lo, COUNT(*) AS n, MAX(chunk_index) AS hi FROM paper_chunks GROUP BY paper_id) WHERE lo != 0 OR hi != n - 1",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(bad_first_index, 0);
    }
}
