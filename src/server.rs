//! HTTP API.
//!
//! Exposes documents, stage retries, speech chunks, playback coordination
//! and document Q&A as a JSON API. Processing runs in the background: a
//! `POST /documents` returns as soon as the document is recorded.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/documents` | Register an uploaded document and start processing |
//! | `GET`  | `/documents` | List documents, newest first |
//! | `GET`  | `/documents/{id}` | Document with per-stage status |
//! | `POST` | `/documents/{id}/stages/{stage}/retry` | Re-trigger a stage |
//! | `GET`  | `/documents/{id}/speech/chunks` | Generated speech chunks so far |
//! | `GET`  | `/documents/{id}/speech/chunks/{index}/audio` | Audio bytes of one chunk |
//! | `GET`  | `/documents/{id}/playback` | Playback state and buffering hint |
//! | `PUT`  | `/documents/{id}/playback` | Set position and/or play state |
//! | `POST` | `/documents/{id}/playback/finished` | Client finished a chunk |
//! | `POST` | `/documents/{id}/search` | Search the document's index |
//! | `GET`  | `/documents/{id}/messages` | Chat history |
//! | `POST` | `/documents/{id}/messages` | Ask a question |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use lectern_core::models::{Document, NewDocument, SpeechChunk, Stage, StageStatus};
use lectern_core::playback::{PlaybackCoordinator, PlaybackError, PlaybackSnapshot};
use lectern_core::store::{StageClaim, Store};

use crate::chat::{AskError, ChatService};
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::pipeline::Pipeline;
use crate::sqlite_store::SqliteStore;

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    playback: Arc<PlaybackCoordinator>,
    chat: Arc<ChatService>,
    search_limit: usize,
}

impl AppState {
    pub fn new(pipeline: Pipeline, playback: PlaybackCoordinator, chat: ChatService) -> Self {
        Self {
            pipeline,
            playback: Arc::new(playback),
            chat: Arc::new(chat),
            search_limit: 5,
        }
    }

    /// Default `limit` for search requests that omit it.
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.pipeline.store()
    }
}

/// Build the state from configuration against the SQLite store, recover
/// interrupted work, and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

    let pipeline = Pipeline::from_config(config, store.clone())?;
    pipeline.recover().await?;

    let playback = PlaybackCoordinator::new(store.clone(), config.playback.policy());
    let chat = ChatService::from_config(&config.chat, store, pipeline.indexer().clone())?;
    let state = AppState::new(pipeline, playback, chat).with_search_limit(config.chat.context_limit);

    serve(state, &config.server.bind).await
}

/// Serve the API for an already-built state.
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "lectern listening");
    println!("Lectern API listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/documents",
            get(handle_list_documents).post(handle_create_document),
        )
        .route("/documents/{id}", get(handle_get_document))
        .route(
            "/documents/{id}/stages/{stage}/retry",
            post(handle_retry_stage),
        )
        .route("/documents/{id}/speech/chunks", get(handle_list_chunks))
        .route(
            "/documents/{id}/speech/chunks/{index}/audio",
            get(handle_chunk_audio),
        )
        .route(
            "/documents/{id}/playback",
            get(handle_get_playback).put(handle_put_playback),
        )
        .route(
            "/documents/{id}/playback/finished",
            post(handle_chunk_finished),
        )
        .route("/documents/{id}/search", post(handle_search))
        .route(
            "/documents/{id}/messages",
            get(handle_list_messages).post(handle_ask),
        )
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Converts into the JSON error envelope.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        internal(format!("{:#}", err))
    }
}

impl From<PlaybackError> for AppError {
    fn from(err: PlaybackError) -> Self {
        match err {
            PlaybackError::NotFound(_) => not_found(err.to_string()),
            PlaybackError::OutOfRange { .. } | PlaybackError::Negative(_) => {
                bad_request(err.to_string())
            }
            PlaybackError::Store(e) => e.into(),
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::NotFound(_) => not_found(err.to_string()),
            AskError::NotIndexed(_) => conflict(err.to_string()),
            AskError::EmptyQuestion | AskError::Disabled => bad_request(err.to_string()),
            AskError::Service(e) => internal(format!("chat service failed: {}", e)),
            AskError::Store(e) => e.into(),
        }
    }
}

async fn require_document(state: &AppState, id: &str) -> Result<Document, AppError> {
    state
        .store()
        .get_document(id)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct CreateDocumentRequest {
    source_ref: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

/// Title from the last path segment of the source reference.
pub fn default_title(source_ref: &str) -> String {
    source_ref
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(source_ref)
        .to_string()
}

async fn handle_create_document(
    State(state): State<AppState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let source_ref = req.source_ref.trim();
    if source_ref.is_empty() {
        return Err(bad_request("source_ref must not be empty"));
    }
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| default_title(source_ref));

    let doc = state
        .pipeline
        .add_document(NewDocument {
            title,
            source_ref: source_ref.to_string(),
            content_type: req.content_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// Document without its extracted text, for listings.
#[derive(Serialize)]
struct DocumentSummary {
    id: String,
    title: String,
    extraction_status: StageStatus,
    indexing_status: StageStatus,
    speech_status: StageStatus,
    chunk_count: Option<i64>,
    speech_chunk_total: Option<i64>,
    created_at: i64,
}

impl From<Document> for DocumentSummary {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            extraction_status: doc.extraction_status,
            indexing_status: doc.indexing_status,
            speech_status: doc.speech_status,
            chunk_count: doc.chunk_count,
            speech_chunk_total: doc.speech_chunk_total,
            created_at: doc.created_at,
        }
    }
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    let docs = state.store().list_documents().await?;
    Ok(Json(docs.into_iter().map(DocumentSummary::from).collect()))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(require_document(&state, &id).await?))
}

#[derive(Serialize)]
struct RetryResponse {
    document_id: String,
    stage: Stage,
    status: &'static str,
}

async fn handle_retry_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(String, String)>,
) -> Result<(StatusCode, Json<RetryResponse>), AppError> {
    let stage: Stage = stage.parse().map_err(|e: anyhow::Error| bad_request(e.to_string()))?;

    match state.pipeline.retry(&id, stage).await? {
        StageClaim::Started => Ok((
            StatusCode::ACCEPTED,
            Json(RetryResponse {
                document_id: id,
                stage,
                status: "submitted",
            }),
        )),
        StageClaim::Missing => Err(not_found(format!("document not found: {}", id))),
        StageClaim::AlreadyRunning => Err(conflict(format!("{} is already processing", stage))),
        StageClaim::AlreadyReady => Err(conflict(format!("{} is already ready", stage))),
        StageClaim::NotReady => Err(conflict(format!(
            "{} needs extraction to be ready first",
            stage
        ))),
    }
}

// ============ Speech chunks ============

#[derive(Serialize)]
struct ChunkListResponse {
    speech_status: StageStatus,
    total_chunks: Option<i64>,
    failed_chunks: Vec<i64>,
    chunks: Vec<SpeechChunk>,
}

async fn handle_list_chunks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChunkListResponse>, AppError> {
    let doc = require_document(&state, &id).await?;
    let chunks = state.store().list_speech_chunks(&id).await?;
    Ok(Json(ChunkListResponse {
        speech_status: doc.speech_status,
        total_chunks: doc.speech_chunk_total,
        failed_chunks: doc.speech_failed_chunks,
        chunks,
    }))
}

async fn handle_chunk_audio(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, i64)>,
) -> Result<Response, AppError> {
    let chunk = state
        .store()
        .get_speech_chunk(&id, index)
        .await?
        .ok_or_else(|| not_found(format!("chunk {} of {} is not ready", index, id)))?;
    let audio_ref = chunk
        .audio_ref
        .ok_or_else(|| not_found(format!("chunk {} of {} has no audio", index, id)))?;
    let bytes = state
        .pipeline
        .audio()
        .load(&audio_ref)
        .await?
        .ok_or_else(|| not_found(format!("audio missing for chunk {} of {}", index, id)))?;

    Ok(([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response())
}

// ============ Playback ============

#[derive(Deserialize)]
struct PlaybackUpdate {
    #[serde(default)]
    current_chunk_index: Option<i64>,
    #[serde(default)]
    is_playing: Option<bool>,
}

#[derive(Deserialize)]
struct ChunkFinished {
    index: i64,
}

async fn handle_get_playback(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PlaybackSnapshot>, AppError> {
    Ok(Json(state.playback.snapshot(&id).await?))
}

async fn handle_put_playback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<PlaybackUpdate>,
) -> Result<Json<PlaybackSnapshot>, AppError> {
    if update.current_chunk_index.is_none() && update.is_playing.is_none() {
        return Err(bad_request(
            "expected current_chunk_index and/or is_playing",
        ));
    }
    if let Some(index) = update.current_chunk_index {
        state.playback.set_position(&id, index).await?;
    }
    if let Some(playing) = update.is_playing {
        state.playback.set_playing(&id, playing).await?;
    }
    Ok(Json(state.playback.snapshot(&id).await?))
}

async fn handle_chunk_finished(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChunkFinished>,
) -> Result<Json<PlaybackSnapshot>, AppError> {
    state.playback.chunk_finished(&id, body.index).await?;
    Ok(Json(state.playback.snapshot(&id).await?))
}

// ============ Search and chat ============

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SearchBody>,
) -> Result<Json<lectern_core::services::SearchResult>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = body.limit.unwrap_or(state.search_limit).max(1);
    Ok(Json(state.chat.search(&id, &body.query, limit).await?))
}

#[derive(Deserialize)]
struct AskBody {
    question: String,
}

async fn handle_list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<lectern_core::models::ChatMessage>>, AppError> {
    Ok(Json(state.chat.history(&id).await?))
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AskBody>,
) -> Result<Json<crate::chat::Answer>, AppError> {
    Ok(Json(state.chat.ask(&id, &body.question).await?))
}
