//! HTTP boundary: board snapshot, both mutation entry points, chat.
//!
//! | Route                     | Meaning                                  |
//! |---------------------------|------------------------------------------|
//! | `GET  /api/board`         | current snapshot `{ lists, version }`    |
//! | `POST /api/board/update`  | full replacement `{ lists }`             |
//! | `POST /api/board/intents` | one mutation intent                      |
//! | `GET  /api/chat`          | retained chat history                    |
//! | `POST /api/chat`          | post a chat message                      |
//! | `GET  /health`            | liveness plus version and session count  |
//!
//! Bodies are parsed here rather than with the `Json` extractor so that
//! every malformed body is reported as `malformed_input`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use trellis_core::{Board, BoardError, ChatDraft, ChatMessage, Intent};

use crate::broadcast::stopped;
use crate::engine::Engine;
use crate::protocol::ErrorBody;
use crate::resolver::Commit;

/// `GET /api/board` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardResponse {
    pub version: u64,
    #[serde(flatten)]
    pub board: Board,
}

/// Reply to both mutation entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub version: u64,
    pub committed: bool,
}

impl From<&Commit> for CommitResponse {
    fn from(commit: &Commit) -> Self {
        Self {
            version: commit.version(),
            committed: commit.is_applied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: u64,
    pub sessions: usize,
}

/// A [`BoardError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub BoardError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            BoardError::NotFound(_) => StatusCode::NOT_FOUND,
            BoardError::InvalidIndex(_) | BoardError::MalformedInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BoardError::StaleReference(_) | BoardError::DuplicateId(_) => StatusCode::CONFLICT,
        }
    }
}

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::from(&self.0))).into_response()
    }
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/api/board", get(get_board))
        .route("/api/board/update", post(replace_board))
        .route("/api/board/intents", post(submit_intent))
        .route("/api/chat", get(chat_history).post(post_chat))
        .route("/health", get(health))
        .with_state(engine)
}

/// Serve the router until the engine's broadcast channel is stopped.
pub async fn serve(listener: TcpListener, engine: Engine) -> std::io::Result<()> {
    let shutdown = engine.channel.shutdown_signal();
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(stopped(shutdown))
        .await
}

async fn get_board(State(engine): State<Engine>) -> Json<BoardResponse> {
    let snapshot = engine.snapshot().await;
    Json(BoardResponse {
        version: snapshot.version,
        board: snapshot.board.clone(),
    })
}

async fn replace_board(State(engine): State<Engine>, body: Bytes) -> Result<Json<CommitResponse>, ApiError> {
    let board: Board = serde_json::from_slice(&body).map_err(BoardError::from)?;
    let commit = engine.submit(None, Intent::replace(board)).await?;
    Ok(Json(CommitResponse::from(&commit)))
}

async fn submit_intent(State(engine): State<Engine>, body: Bytes) -> Result<Json<CommitResponse>, ApiError> {
    let intent: Intent = serde_json::from_slice(&body).map_err(BoardError::from)?;
    let commit = engine.submit(None, intent).await?;
    Ok(Json(CommitResponse::from(&commit)))
}

async fn chat_history(State(engine): State<Engine>) -> Json<Vec<ChatMessage>> {
    Json(engine.store.chat_history().await)
}

async fn post_chat(State(engine): State<Engine>, body: Bytes) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let draft: ChatDraft = serde_json::from_slice(&body).map_err(BoardError::from)?;
    let message = engine.post_chat(None, draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn health(State(engine): State<Engine>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: engine.store.version().await,
        sessions: engine.sessions.count().await,
    })
}
