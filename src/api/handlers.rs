//! HTTP request handlers

use super::assets::{get_index_html, serve_static};
use super::sse::sse_stream;
use super::types::{
    ChatRequest, ChatResponse, ConversationListResponse, ConversationResponse, ErrorResponse,
    HealthResponse, NewConversationResponse,
};
use super::AppState;
use crate::runtime::SseEvent;
use crate::state_machine::TransitionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Root serves the single-page UI
        .route("/", get(serve_index))
        .route("/assets/*path", get(serve_static))
        // Conversations
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/new", post(create_conversation))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/stream", get(stream_conversation))
        .route("/api/conversations/:id/chat", post(send_chat))
        // Service info
        .route("/api/health", get(health))
        .route("/version", get(get_version))
        .with_state(state)
}

async fn serve_index() -> Response {
    match get_index_html() {
        Some(content) => Html(content).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html("<h1>404 - UI not found</h1>".to_string()),
        )
            .into_response(),
    }
}

// ============================================================
// Conversations
// ============================================================

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let conversations = state
        .runtime
        .db()
        .list_summaries()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ConversationListResponse { conversations }))
}

/// Mint an identifier. Nothing is stored until the first message.
async fn create_conversation() -> Json<NewConversationResponse> {
    Json(NewConversationResponse {
        id: uuid::Uuid::new_v4().to_string(),
    })
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let db = state.runtime.db();
    let title = db
        .get_title(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let messages = db
        .get_records(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ConversationResponse {
        busy: state.runtime.is_busy(&id).await,
        id,
        title,
        messages,
    }))
}

async fn stream_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // Subscribe before reading so nothing persisted in between is missed
    let subscription = state
        .runtime
        .subscribe(&id)
        .await
        .map_err(AppError::Internal)?;

    let db = state.runtime.db();
    let title = db
        .get_title(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let messages = db
        .get_records(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let init_event = SseEvent::Init {
        busy: state.runtime.is_busy(&id).await,
        conversation_id: id,
        title,
        messages,
        partial: subscription.partial,
    };

    Ok(sse_stream(init_event, subscription.events))
}

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest(TransitionError::EmptyMessage.to_string()));
    }
    if state.runtime.is_busy(&id).await {
        return Err(AppError::Conflict(TransitionError::Busy.to_string()));
    }

    state
        .runtime
        .send_user_message(&id, req.text)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse { queued: true }))
}

// ============================================================
// Service info
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.runtime.generator().model_id().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("threadchat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
