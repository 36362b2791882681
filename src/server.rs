//! HTTP front end.
//!
//! Exposes the process-then-chat workflow as a small JSON API so a browser
//! or script can drive it the same way the CLI does.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Whether an index exists |
//! | `POST` | `/process` | Upload files (base64) and rebuild the index |
//! | `POST` | `/chat` | Ask a question within a session |
//! | `GET`  | `/sessions/{id}/messages` | Transcript of a session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! Transcripts are kept in memory and are lost when the server stops. At most
//! `[server].max_sessions` are held; the least recently used is dropped first.
//! `POST /process` requests are handled one at a time, and their bodies may be
//! up to `[server].max_upload_bytes` (413 beyond that).

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::index::{index_state, IndexState};
use crate::indexer::{create_vectorstore, IndexSummary};
use crate::ingest::{load_documents, Upload};
use crate::llm::{ChatModel, GroqClient};
use crate::models::{ConversationTurn, FileKind, SUPPORTED_EXTENSIONS};
use crate::rag::{Answer, RagChain, SourceRef};
use crate::session::SessionStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    chain: Arc<RagChain>,
    sessions: Arc<Mutex<SessionStore>>,
    process_lock: Arc<Mutex<()>>,
}

/// Starts the HTTP server on `[server].bind`.
///
/// The embedding model is loaded and the chat client constructed before
/// binding, so a missing API key fails here rather than on the first
/// question.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let chat_model: Arc<dyn ChatModel> = Arc::new(GroqClient::new(config.api_key())?);
    let embedder = embedding::default_embedder(config).await?;
    let app = router(config.clone(), embedder, chat_model);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router with explicit capabilities.
pub fn router(
    config: Config,
    embedder: Arc<dyn Embedder>,
    chat_model: Arc<dyn ChatModel>,
) -> Router {
    let chain = Arc::new(RagChain::new(
        config.clone(),
        embedder.clone(),
        chat_model,
    ));
    let max_upload_bytes = config.server.max_upload_bytes;
    let sessions = SessionStore::new(config.server.max_sessions);
    let state = AppState {
        config: Arc::new(config),
        embedder,
        chain,
        sessions: Arc::new(Mutex::new(sessions)),
        process_lock: Arc::new(Mutex::new(())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route(
            "/process",
            post(handle_process).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/chat", post(handle_chat))
        .route("/sessions/{id}/messages", get(handle_messages))
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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
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

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    state: IndexState,
    message: &'static str,
}

/// Sidebar text for an index state.
pub fn status_message(state: IndexState) -> &'static str {
    match state {
        IndexState::Ready => "Ready to chat!",
        IndexState::Empty => "Process documents first",
    }
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let current = index_state(&state.config);
    Json(StatusResponse {
        state: current,
        message: status_message(current),
    })
}

// ============ POST /process ============

#[derive(Deserialize)]
struct ProcessRequest {
    files: Vec<UploadedFile>,
}

#[derive(Deserialize)]
struct UploadedFile {
    name: String,
    content_base64: String,
}

#[derive(Serialize)]
struct ProcessResponse {
    processed: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<IndexSummary>,
}

async fn handle_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, AppError> {
    if req.files.is_empty() {
        return Err(bad_request("Upload files first!"));
    }

    let mut uploads = Vec::with_capacity(req.files.len());
    for file in req.files {
        if FileKind::from_file_name(&file.name).is_none() {
            return Err(bad_request(format!(
                "unsupported file type: {} (allowed: {})",
                file.name,
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(file.content_base64.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", file.name, e)))?;
        uploads.push(Upload::new(file.name, bytes));
    }

    let _guard = state.process_lock.lock().await;
    let documents = load_documents(&state.config, &uploads).await;
    let summary = create_vectorstore(&state.config, state.embedder.as_ref(), &documents)
        .await
        .map_err(internal)?;

    Ok(Json(match summary {
        Some(summary) => ProcessResponse {
            processed: true,
            message: "Documents processed!".to_string(),
            summary: Some(summary),
        },
        None => ProcessResponse {
            processed: false,
            message: "No documents to process!".to_string(),
            summary: None,
        },
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    question: String,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: String,
    ready: bool,
    answer: String,
    sources: Vec<SourceRef>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let session_id = req
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state
        .sessions
        .lock()
        .await
        .entry(&session_id)
        .push_user(question);

    let answer = state
        .chain
        .answer_question(question)
        .await
        .map_err(internal)?;

    let text = answer.text().to_string();
    if let Some(transcript) = state.sessions.lock().await.get_mut(&session_id) {
        transcript.push_assistant(text.clone());
    }

    let (ready, sources) = match answer {
        Answer::NotReady => (false, Vec::new()),
        Answer::Generated { sources, .. } => (true, sources),
    };
    Ok(Json(ChatResponse {
        session_id,
        ready,
        answer: text,
        sources,
    }))
}

// ============ GET /sessions/{id}/messages ============

#[derive(Serialize)]
struct MessagesResponse {
    session_id: String,
    messages: Vec<ConversationTurn>,
}

async fn handle_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let sessions = state.sessions.lock().await;
    let transcript = sessions
        .get(&id)
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))?;
    Ok(Json(MessagesResponse {
        session_id: id.clone(),
        messages: transcript.turns().to_vec(),
    }))
}
