//! REST API server for the portfolio agent
//!
//! Thin HTTP surface over the orchestrator. Error kinds map to status
//! codes in one place (`status_for`).

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::{AgentError, ErrorKind};
use crate::models::{ChatMessage, MessageRole};
use crate::state::{history_from_turns, ConversationStore, Feedback};

//
// ================= Request Models =================
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Continue a stored conversation; a new one is started when absent
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Prior turns followed by the new user message
    pub messages: Vec<ChatMessage>,
}

//
// ================= Response Wrapper =================
//

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            error_type: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(error: &AgentError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            error_type: Some(error.kind().to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::BudgetExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::ApiError => StatusCode::BAD_GATEWAY,
        ErrorKind::ToolError | ErrorKind::VerificationError | ErrorKind::Unknown => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: &AgentError) -> (StatusCode, Json<ApiResponse>) {
    let status = status_for(error.kind());
    if status.is_server_error() {
        warn!(error = %error, status = %status, "Request failed");
    }
    (status, Json(ApiResponse::error(error)))
}

//
// ================= API State =================
//

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn ConversationStore>,
}

/// Split request messages into history and the new user message. Stored
/// turns stand in for history when the caller sent none.
async fn prepare_turn(
    state: &ApiState,
    req: ChatRequest,
) -> Result<(Uuid, Vec<ChatMessage>, String), AgentError> {
    let mut messages = req.messages;
    let message = match messages.pop() {
        Some(last) if last.role == MessageRole::User && !last.content.trim().is_empty() => {
            last.content
        }
        _ => {
            return Err(AgentError::ValidationError(
                "last message must be a non-empty user message".to_string(),
            ))
        }
    };

    let conversation_id = req.conversation_id.unwrap_or_else(Uuid::new_v4);
    let history = if messages.is_empty() && req.conversation_id.is_some() {
        history_from_turns(&state.store.load_turns(conversation_id).await?)
    } else {
        messages
    };

    Ok((conversation_id, history, message))
}

//
// ================= Handlers =================
//

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let (conversation_id, history, message) = match prepare_turn(&state, req).await {
        Ok(turn) => turn,
        Err(e) => return error_response(&e),
    };
    info!(conversation_id = %conversation_id, history = history.len(), "Chat request");

    match state
        .orchestrator
        .chat_turn(conversation_id, &history, &message)
        .await
    {
        Ok(response) => {
            let mut data = serde_json::to_value(&response).unwrap_or_default();
            data["conversationId"] = serde_json::json!(conversation_id);
            (StatusCode::OK, Json(ApiResponse::success(data)))
        }
        Err(e) => error_response(&e),
    }
}

/// Plain-text stream: message chunks, then one `__METADATA__{json}` line
async fn chat_stream_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let (conversation_id, history, message) = match prepare_turn(&state, req).await {
        Ok(turn) => turn,
        Err(e) => return error_response(&e).into_response(),
    };
    info!(conversation_id = %conversation_id, "Streaming chat request");

    let rx = state
        .orchestrator
        .clone()
        .chat_stream(conversation_id, history, message);
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn feedback_handler(
    State(state): State<ApiState>,
    Json(feedback): Json<Feedback>,
) -> (StatusCode, Json<ApiResponse>) {
    let conversation_id = feedback.conversation_id;
    let rating = feedback.rating;

    match state.store.record_feedback(feedback).await {
        Ok(()) => {
            info!(conversation_id = %conversation_id, rating = ?rating, "Feedback recorded");
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({ "recorded": true }))),
            )
        }
        Err(e) => error_response(&e),
    }
}

//
// ================= Router =================
//

pub fn create_router(orchestrator: Arc<Orchestrator>, store: Arc<dyn ConversationStore>) -> Router {
    let state = ApiState {
        orchestrator,
        store,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/feedback", post(feedback_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

//
// ================= Server Startup =================
//

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn ConversationStore>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, store);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
