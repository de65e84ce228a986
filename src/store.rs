//! Persistence gateway and retrieval engine.
//!
//! Owns the `papers`, `paper_chunks`, and `papers_fts` tables. All
//! multi-statement writes run inside a transaction so a failure never leaves
//! partially-applied records: no chunk set without its paper, no
//! half-replaced chunk set.
//!
//! Similarity search scores every stored chunk vector against the query in
//! Rust, keeps an over-fetched candidate pool, then deduplicates by paper id
//! so one strong paper cannot occupy several result slots.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::SimilarityMetric;
use crate::embedding::{blob_to_vec, score_vectors, vec_to_blob};
use crate::error::Result;
use crate::models::{Paper, PaperChunk, PaperDraft, SearchScoreResult};

/// Default candidate-pool multiplier for similarity search.
pub const DEFAULT_OVERFETCH_FACTOR: i64 = 10;

pub struct PaperStore {
    pool: SqlitePool,
    overfetch_factor: i64,
}

impl PaperStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }

    pub fn with_overfetch_factor(mut self, factor: i64) -> Self {
        self.overfetch_factor = factor.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Paper CRUD ============

    pub async fn create(&self, draft: &PaperDraft) -> Result<Paper> {
        let paper = Paper {
            id: Uuid::new_v4().to_string(),
            title: draft.title.clone(),
            authors: draft.authors.clone(),
            publication_date: draft.publication_date,
            url: draft.url.clone(),
            abstract_text: draft.abstract_text.clone(),
            conference: draft.conference.clone(),
            keywords: draft.keywords.clone(),
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO papers (id, title, authors, publication_date, url, abstract, conference, keywords, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&paper.id)
        .bind(&paper.title)
        .bind(json_list(&paper.authors))
        .bind(paper.publication_date.timestamp())
        .bind(&paper.url)
        .bind(&paper.abstract_text)
        .bind(&paper.conference)
        .bind(json_list(&paper.keywords))
        .bind(paper.created_at.timestamp())
        .execute(&mut *tx)
        .await?;

        insert_fts_row(&mut tx, &paper).await?;

        tx.commit().await?;
        Ok(paper)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Paper>> {
        let row = sqlx::query(
            "SELECT id, title, authors, publication_date, url, abstract, conference, keywords, created_at FROM papers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| paper_from_row(&r)))
    }

    /// Full-record patch by id. Returns `None` when no paper has that id.
    pub async fn update(&self, id: &str, draft: &PaperDraft) -> Result<Option<Paper>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE papers
            SET title = ?, authors = ?, publication_date = ?, url = ?,
                abstract = ?, conference = ?, keywords = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft.title)
        .bind(json_list(&draft.authors))
        .bind(draft.publication_date.timestamp())
        .bind(&draft.url)
        .bind(&draft.abstract_text)
        .bind(&draft.conference)
        .bind(json_list(&draft.keywords))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query("DELETE FROM papers_fts WHERE paper_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            "SELECT id, title, authors, publication_date, url, abstract, conference, keywords, created_at FROM papers WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        let paper = paper_from_row(&row);

        insert_fts_row(&mut tx, &paper).await?;

        tx.commit().await?;
        Ok(Some(paper))
    }

    /// Delete a paper; its chunks cascade with it.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM papers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM papers_fts WHERE paper_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    // ============ Chunk embeddings ============

    pub async fn add_embedding(
        &self,
        paper_id: &str,
        chunk_index: i64,
        embedding: &[f32],
    ) -> Result<PaperChunk> {
        let chunk = PaperChunk {
            id: Uuid::new_v4().to_string(),
            paper_id: paper_id.to_string(),
            chunk_index,
            embedding: embedding.to_vec(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO paper_chunks (id, paper_id, chunk_index, embedding, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.paper_id)
        .bind(chunk.chunk_index)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(chunk.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(chunk)
    }

    /// Delete every chunk for a paper.
    pub async fn clean_embeddings(&self, paper_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM paper_chunks WHERE paper_id = ?")
            .bind(paper_id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    /// Replace a paper's chunk set: delete all existing chunks, then insert
    /// the new vectors with contiguous indices starting at 0, in a single
    /// transaction, so re-running ingestion converges and a failure cannot
    /// leave a mixed set.
    pub async fn replace_embeddings(
        &self,
        paper_id: &str,
        vectors: &[Vec<f32>],
    ) -> Result<Vec<PaperChunk>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM paper_chunks WHERE paper_id = ?")
            .bind(paper_id)
            .execute(&mut *tx)
            .await?;

        let created_at = Utc::now();
        let mut chunks = Vec::with_capacity(vectors.len());

        for (i, vector) in vectors.iter().enumerate() {
            let chunk = PaperChunk {
                id: Uuid::new_v4().to_string(),
                paper_id: paper_id.to_string(),
                chunk_index: i as i64,
                embedding: vector.clone(),
                created_at,
            };

            sqlx::query(
                "INSERT INTO paper_chunks (id, paper_id, chunk_index, embedding, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.paper_id)
            .bind(chunk.chunk_index)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(chunk.created_at.timestamp())
            .execute(&mut *tx)
            .await?;

            chunks.push(chunk);
        }

        tx.commit().await?;
        Ok(chunks)
    }

    /// All chunks for a paper, ordered by index.
    pub async fn chunks_for_paper(&self, paper_id: &str) -> Result<Vec<PaperChunk>> {
        let rows = sqlx::query(
            "SELECT id, paper_id, chunk_index, embedding, created_at FROM paper_chunks WHERE paper_id = ? ORDER BY chunk_index",
        )
        .bind(paper_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                PaperChunk {
                    id: row.get("id"),
                    paper_id: row.get("paper_id"),
                    chunk_index: row.get("chunk_index"),
                    embedding: blob_to_vec(&blob),
                    created_at: timestamp_to_datetime(row.get("created_at")),
                }
            })
            .collect())
    }

    // ============ Similarity search ============

    /// Rank stored chunks against a query vector and return the `top_k`
    /// closest distinct papers.
    ///
    /// Cosine/Euclidean results come back in non-decreasing distance order;
    /// inner-product results in non-increasing score order. The candidate
    /// pool is over-fetched (`overfetch_factor * top_k` chunk rows) before
    /// deduplication because several chunks of the same paper can rank near
    /// the query.
    pub async fn similarity_search(
        &self,
        query: &[f32],
        top_k: i64,
        metric: SimilarityMetric,
    ) -> Result<Vec<SearchScoreResult>> {
        let rows = sqlx::query("SELECT paper_id, embedding FROM paper_chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut candidates: Vec<(String, f64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let score = score_vectors(metric, query, &vector);
                (row.get("paper_id"), score)
            })
            .collect();

        if metric.lower_is_better() {
            candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        }
        candidates.truncate((self.overfetch_factor * top_k).max(0) as usize);

        // Dedup by paper, keeping each paper's best-ranked chunk, until
        // top_k distinct papers are collected.
        let mut results = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (paper_id, score) in candidates {
            if !seen.insert(paper_id.clone()) {
                continue;
            }
            if let Some(paper) = self.get_by_id(&paper_id).await? {
                results.push(SearchScoreResult { score, paper });
            }
            if results.len() as i64 >= top_k {
                break;
            }
        }

        Ok(results)
    }

    // ============ Text search ============

    /// Lexical relevance search over title + abstract + keywords.
    ///
    /// Terms are OR-combined so partial matches still surface; bm25 ranks
    /// papers matching more terms higher. Scores are negated bm25 ranks, so
    /// higher is better and results come back in descending order.
    pub async fn text_search(&self, query: &str, top_k: i64) -> Result<Vec<SearchScoreResult>> {
        let match_expr = fts_match_expression(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT paper_id, rank
            FROM papers_fts
            WHERE papers_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(top_k)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let paper_id: String = row.get("paper_id");
            let rank: f64 = row.get("rank");
            if let Some(paper) = self.get_by_id(&paper_id).await? {
                results.push(SearchScoreResult {
                    score: -rank,
                    paper,
                });
            }
        }

        Ok(results)
    }
}

/// Build an FTS5 MATCH expression from free-form query text: each token is
/// double-quoted (so punctuation cannot break the query grammar) and tokens
/// are OR-combined.
fn fts_match_expression(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "")))
        .filter(|t| t.len() > 2)
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn insert_fts_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    paper: &Paper,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO papers_fts (paper_id, title, abstract, keywords) VALUES (?, ?, ?, ?)",
    )
    .bind(&paper.id)
    .bind(&paper.title)
    .bind(paper.abstract_text.as_deref().unwrap_or(""))
    .bind(paper.keywords.join(" "))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn paper_from_row(row: &sqlx::sqlite::SqliteRow) -> Paper {
    let authors: String = row.get("authors");
    let keywords: String = row.get("keywords");

    Paper {
        id: row.get("id"),
        title: row.get("title"),
        authors: serde_json::from_str(&authors).unwrap_or_default(),
        publication_date: timestamp_to_datetime(row.get("publication_date")),
        url: row.get("url"),
        abstract_text: row.get("abstract"),
        conference: row.get("conference"),
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        created_at: timestamp_to_datetime(row.get("created_at")),
    }
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use chrono::TimeZone;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_store() -> PaperStore {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        PaperStore::new(pool)
    }

    fn draft(title: &str, abstract_text: &str, keywords: &[&str]) -> PaperDraft {
        PaperDraft {
            title: title.to_string(),
            authors: vec!["Ada Lovelace".to_string()],
            publication_date: Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(),
            url: None,
            abstract_text: Some(abstract_text.to_string()),
            conference: Some("NeurIPS".to_string()),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrip() {
        let store = test_store().await;
        let paper = store
            .create(&draft("Attention Revisited", "We revisit attention.", &[]))
            .await
            .unwrap();

        let fetched = store.get_by_id(&paper.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Attention Revisited");
        assert_eq!(fetched.authors, vec!["Ada Lovelace"]);
        assert_eq!(fetched.abstract_text.as_deref(), Some("We revisit attention."));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = test_store().await;
        assert!(store.get_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_patches_record() {
        let store = test_store().await;
        let paper = store.create(&draft("Old Title", "abs", &[])).await.unwrap();

        let patched = store
            .update(&paper.id, &draft("New Title", "new abs", &["kw"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patched.title, "New Title");
        assert_eq!(patched.keywords, vec!["kw"]);

        assert!(store
            .update("missing-id", &draft("X", "y", &[]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks() {
        let store = test_store().await;
        let paper = store.create(&draft("Doomed", "abs", &[])).await.unwrap();
        store
            .replace_embeddings(&paper.id, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();

        assert!(store.delete(&paper.id).await.unwrap());
        assert!(store.get_by_id(&paper.id).await.unwrap().is_none());
        assert!(store.chunks_for_paper(&paper.id).await.unwrap().is_empty());
        assert!(!store.delete(&paper.id).await.unwrap());
    }

    #[tokio::test]
    async fn replace_embeddings_is_idempotent() {
        let store = test_store().await;
        let paper = store.create(&draft("Chunky", "abs", &[])).await.unwrap();

        let vectors = vec![vec![1.0, 0.0], vec![0.5, 0.5], vec![0.0, 1.0]];
        store.replace_embeddings(&paper.id, &vectors).await.unwrap();
        store.replace_embeddings(&paper.id, &vectors).await.unwrap();

        let chunks = store.chunks_for_paper(&paper.id).await.unwrap();
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
        }
    }

    #[tokio::test]
    async fn clean_embeddings_removes_all() {
        let store = test_store().await;
        let paper = store.create(&draft("Cleanable", "abs", &[])).await.unwrap();
        store.add_embedding(&paper.id, 0, &[1.0, 0.0]).await.unwrap();
        store.add_embedding(&paper.id, 1, &[0.0, 1.0]).await.unwrap();

        assert!(store.clean_embeddings(&paper.id).await.unwrap());
        assert!(store.chunks_for_paper(&paper.id).await.unwrap().is_empty());
        assert!(!store.clean_embeddings(&paper.id).await.unwrap());
    }

    #[tokio::test]
    async fn similarity_search_returns_globally_closest_paper() {
        let store = test_store().await;
        let near = store.create(&draft("Near Paper", "abs", &[])).await.unwrap();
        let far = store.create(&draft("Far Paper", "abs", &[])).await.unwrap();

        store
            .replace_embeddings(&near.id, &[vec![1.0, 0.0], vec![0.9, 0.1]])
            .await
            .unwrap();
        store
            .replace_embeddings(&far.id, &[vec![0.0, 1.0], vec![0.1, 0.9]])
            .await
            .unwrap();

        let results = store
            .similarity_search(&[1.0, 0.0], 1, SimilarityMetric::Cosine)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].paper.id, near.id);
    }

    #[tokio::test]
    async fn similarity_search_dedups_by_paper() {
        let store = test_store().await;
        let a = store.create(&draft("Paper A", "abs", &[])).await.unwrap();
        let b = store.create(&draft("Paper B", "abs", &[])).await.unwrap();

        store
            .replace_embeddings(&a.id, &[vec![1.0, 0.0], vec![0.99, 0.01]])
            .await
            .unwrap();
        store
            .replace_embeddings(&b.id, &[vec![0.7, 0.3], vec![0.6, 0.4]])
            .await
            .unwrap();

        let results = store
            .similarity_search(&[1.0, 0.0], 5, SimilarityMetric::Cosine)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let ids: Vec<&str> = results.iter().map(|r| r.paper.id.as_str()).collect();
        assert_ne!(ids[0], ids[1]);
        // Cosine distances are non-decreasing.
        assert!(results[0].score <= results[1].score);
    }

    #[tokio::test]
    async fn inner_product_orders_descending() {
        let store = test_store().await;
        let a = store.create(&draft("Paper A", "abs", &[])).await.unwrap();
        let b = store.create(&draft("Paper B", "abs", &[])).await.unwrap();

        store.replace_embeddings(&a.id, &[vec![2.0, 0.0]]).await.unwrap();
        store.replace_embeddings(&b.id, &[vec![1.0, 0.0]]).await.unwrap();

        let results = store
            .similarity_search(&[1.0, 0.0], 5, SimilarityMetric::InnerProduct)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].paper.id, a.id);
    }

    #[tokio::test]
    async fn text_search_ranks_full_matches_above_partial() {
        let store = test_store().await;

        for title in [
            "Graph Neural Networks for Molecules",
            "Scalable Graph Neural Networks",
            "A Survey of Graph Neural Networks",
        ] {
            store
                .create(&draft(title, "We study graph neural networks.", &[]))
                .await
                .unwrap();
        }
        let partial = store
            .create(&draft("Random Graph Models", "Percolation on random graphs.", &[]))
            .await
            .unwrap();

        let results = store.text_search("graph neural networks", 5).await.unwrap();

        assert_eq!(results.len(), 4);
        // The three full-term papers outrank the partial match.
        let partial_pos = results
            .iter()
            .position(|r| r.paper.id == partial.id)
            .unwrap();
        assert_eq!(partial_pos, 3);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn text_search_empty_query_returns_nothing() {
        let store = test_store().await;
        assert!(store.text_search("", 5).await.unwrap().is_empty());
    }
}
