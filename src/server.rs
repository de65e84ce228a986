//! Inbound HTTP API.
//!
//! Exposes paper CRUD, PDF upload/download, search, and the storage-event
//! hook that re-embeds a paper after its PDF lands in the object store.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/paper` | Create a paper from a draft payload |
//! | `GET`  | `/paper/{id}` | Fetch paper metadata |
//! | `POST` | `/paper/{id}/upload` | Upload the paper's PDF (raw bytes) |
//! | `GET`  | `/paper/{id}/download` | Download the stored PDF |
//! | `POST` | `/paper/process` | Storage-event notification → re-embed |
//! | `GET`  | `/search` | Text or similarity search (`q`, `mode`, `top_k`) |
//! | `GET`  | `/health` | Liveness probe |
//!
//! Errors use a JSON envelope: `{ "error": { "code": ..., "message": ... } }`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::{embed_abstract, EmbeddingProvider};
use crate::error::Error;
use crate::models::PaperDraft;
use crate::object_store::ObjectStore;
use crate::store::PaperStore;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<PaperStore>,
    objects: Option<Arc<ObjectStore>>,
    provider: Arc<dyn EmbeddingProvider>,
}

/// Start the HTTP server on `[server].bind`, serving until terminated.
pub async fn run_server(
    config: Arc<Config>,
    store: Arc<PaperStore>,
    objects: Option<Arc<ObjectStore>>,
    provider: Arc<dyn EmbeddingProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config,
        store,
        objects,
        provider,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/paper", post(handle_create))
        .route("/paper/process", post(handle_process_event))
        .route("/paper/{id}", get(handle_get))
        .route("/paper/{id}/upload", post(handle_upload))
        .route("/paper/{id}/download", get(handle_download))
        .route("/search", get(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error envelope ============

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::Configuration(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Storage { .. } => (StatusCode::BAD_GATEWAY, "storage_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

// ============ Handlers ============

async fn handle_create(
    State(state): State<AppState>,
    Json(draft): Json<PaperDraft>,
) -> Result<impl IntoResponse, ApiError> {
    if draft.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    let paper = state.store.create(&draft).await?;
    Ok((StatusCode::CREATED, Json(paper)))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let paper = state
        .store
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("paper {} not found", id)))?;
    Ok(Json(paper))
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let objects = state
        .objects
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("object storage is not configured"))?;

    let paper = state
        .store
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("paper {} not found", id)))?;

    let stored = objects.upload(&ObjectStore::pdf_key(&paper.id), &body).await?;
    Ok(Json(serde_json::json!({ "id": paper.id, "stored": stored })))
}

async fn handle_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let objects = state
        .objects
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("object storage is not configured"))?;

    let bytes = objects.download(&ObjectStore::pdf_key(&id)).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.pdf\"", id),
            ),
        ],
        bytes,
    ))
}

/// Storage-event notification payload, the bucket-notification shape MinIO
/// and S3 emit: `{ "Records": [ { "s3": { "bucket": ..., "object": { "key": ... } } } ] }`.
async fn handle_process_event(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let records = payload
        .get("Records")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();

    let mut processed = 0usize;

    for record in &records {
        let Some(key) = record
            .pointer("/s3/object/key")
            .and_then(|k| k.as_str())
        else {
            continue;
        };

        let paper_id = key
            .strip_prefix("papers/")
            .unwrap_or(key)
            .strip_suffix(".pdf")
            .unwrap_or(key);

        let paper = state
            .store
            .get_by_id(paper_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("paper {} not found", paper_id)))?;

        // The full PDF is too large to embed wholesale; the abstract is the
        // unit of semantic indexing here.
        let abstract_text = paper.abstract_text.as_deref().unwrap_or("");
        let vectors = embed_abstract(
            state.provider.as_ref(),
            state.config.chunking.max_chars,
            abstract_text,
        )
        .await?;
        state.store.replace_embeddings(&paper.id, &vectors).await?;

        tracing::info!(paper = %paper.id, key, "re-embedded after storage event");
        processed += 1;
    }

    Ok(Json(serde_json::json!({ "processed": processed })))
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default = "default_mode")]
    mode: String,
    top_k: Option<i64>,
}

fn default_mode() -> String {
    "text".to_string()
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.q.trim().is_empty() {
        return Err(ApiError::bad_request("q must not be empty"));
    }
    let top_k = params.top_k.unwrap_or(state.config.retrieval.top_k);

    let results = match params.mode.as_str() {
        "text" => state.store.text_search(&params.q, top_k).await?,
        "similarity" => {
            let metric = state.config.retrieval.metric()?;
            let vectors = state.provider.embed(&[params.q.clone()]).await?;
            let query = vectors
                .into_iter()
                .next()
                .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))?;
            state.store.similarity_search(&query, top_k, metric).await?
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown search mode: '{}'. Use text or similarity.",
                other
            )))
        }
    };

    Ok(Json(serde_json::json!({ "results": results })))
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
