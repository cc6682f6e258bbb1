use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clawmini_kernel::AssistantKernel;
use clawmini_protocol::{CoreError, Message, SessionId, TurnEvent};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub const DEFAULT_SESSION_ID: &str = "main_session";

#[derive(Clone)]
pub struct AppState {
    pub kernel: AssistantKernel,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default = "default_session_id")]
    session_id: String,
    #[serde(default = "default_stream")]
    stream: bool,
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_owned()
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    path: String,
}

#[derive(Debug, Deserialize)]
struct FileSaveRequest {
    path: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct SessionHistory {
    session_id: SessionId,
    messages: Vec<Message>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        let status = match &error {
            CoreError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::ToolDenied(_) => StatusCode::FORBIDDEN,
            CoreError::CorruptState { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<CoreError>() {
            Ok(core) => core.into(),
            Err(other) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("{other:#}"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, message = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat))
        .route("/api/files", get(read_file).post(save_file))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{session_id}", get(session_history))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "clawmini-api"
    }))
}

/// One SSE record per turn event. SSE cannot carry carriage returns.
fn as_sse_event(event: &TurnEvent) -> Event {
    let text = event.wire_text().replace("\r\n", "\n").replace('\r', "\n");
    Event::default().data(text)
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if !request.stream {
        return Err(ApiError::bad_request(
            "non-streaming responses are not supported",
        ));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let events = state
        .kernel
        .chat(SessionId::from_string(request.session_id), request.message)?;
    let stream = events.map(|event| Ok(as_sse_event(&event)));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let content = state
        .kernel
        .read_file(&query.path)
        .await
        .map_err(|error| match ApiError::from(error) {
            not_found if not_found.status == StatusCode::NOT_FOUND => {
                ApiError::not_found(format!("File {} not found.", query.path))
            }
            other => other,
        })?;
    Ok(Json(json!({ "path": query.path, "content": content })))
}

async fn save_file(
    State(state): State<AppState>,
    Json(request): Json<FileSaveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .kernel
        .write_file(&request.path, &request.content)
        .await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state.kernel.list_sessions().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

async fn session_history(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SessionHistory>> {
    let session_id = SessionId::from_string(session_id);
    let messages = state.kernel.history(&session_id).await?;
    Ok(Json(SessionHistory {
        session_id,
        messages,
    }))
}
