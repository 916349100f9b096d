use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::chat::{
    ChatController, ConversationSnapshot, Rejection, Session, SessionStore, sanitize_input,
};
use crate::config::AppConfig;
use crate::events::{ChatEvent, sse_event};
use crate::generation::OllamaClient;
use crate::settings::{Settings, SettingsStore, SettingsUpdate};
use crate::ui;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let client = OllamaClient::new(config.generation.clone())?;

    info!(
        name: "generation.config.loaded",
        endpoint = %client.endpoint(),
        model = %config.generation.model,
        connect_timeout_secs = config.generation.connect_timeout_secs,
        timeout_secs = config.generation.timeout_secs,
        "Generation server configured"
    );

    let sessions = SessionStore::new(Arc::new(client), config.chat.max_history_length);
    sessions.spawn_expiry_sweep(
        config.chat.session_idle_timeout(),
        config.chat.session_sweep_interval(),
    );

    let state = AppState {
        sessions,
        settings: SettingsStore::new(config.settings.clone()),
        config: Arc::clone(&config),
    };

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let timeout_duration = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/settings", get(api_get_settings).put(api_put_settings))
        .route(
            "/api/sessions",
            get(api_list_sessions).post(api_create_session),
        )
        .route(
            "/api/sessions/{id}",
            get(api_get_session)
                .put(api_attach_session)
                .delete(api_delete_session),
        )
        .route("/api/sessions/{id}/input", put(api_set_input))
        .route("/api/sessions/{id}/submit", post(api_submit))
        .route("/api/sessions/{id}/key", post(api_key))
        .route("/api/sessions/{id}/cancel", post(api_cancel))
        .route("/api/sessions/{id}/clear", post(api_clear))
        .route("/api/sessions/{id}/events", get(api_session_events))
        .layer(TraceLayer::new_for_http())
        // Bounds the time to a response head only; SSE bodies stream on.
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pages
// ─────────────────────────────────────────────────────────────────────────────

async fn index_handler(State(state): State<AppState>) -> impl IntoResponse {
    Html(ui::render_page(&state.settings.get()))
}

async fn health_handler() -> &'static str {
    "ok"
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/settings
async fn api_get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.get())
}

/// PUT /api/settings - Partial update.
async fn api_put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<Settings> {
    let settings = state.settings.apply(update);
    info!(color = %settings.color, font_family = %settings.font_family, "Settings updated");
    Json(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Session details with the full conversation.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub conversation: ConversationSnapshot,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            created_at: session.created_at(),
            conversation: session.controller().snapshot(),
        }
    }
}

/// Session entry for listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub turn_count: usize,
    pub processing: bool,
}

/// Body for PUT /api/sessions/:id/input.
#[derive(Debug, Deserialize)]
struct InputRequest {
    text: String,
}

/// Body for POST /api/sessions/:id/submit.
#[derive(Debug, Default, Deserialize)]
struct SubmitRequest {
    /// Replaces the current input before submitting.
    #[serde(default)]
    message: Option<String>,
}

/// Body for POST /api/sessions/:id/key.
#[derive(Debug, Deserialize)]
struct KeyRequest {
    key: String,
    /// Input box contents at the time of the key press.
    #[serde(default)]
    input: Option<String>,
}

fn lookup(state: &AppState, id: &str) -> Result<Arc<ChatController>, StatusCode> {
    match state.sessions.get(id) {
        Some(session) => Ok(Arc::clone(session.controller())),
        None => {
            tracing::debug!(session_id = %id, "Session not found");
            Err(StatusCode::NOT_FOUND)
        }
    }
}

/// GET /api/sessions - List all sessions.
async fn api_list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state
        .sessions
        .sessions()
        .iter()
        .map(|s| {
            let snapshot = s.controller().snapshot();
            SessionSummary {
                id: s.id().to_string(),
                turn_count: snapshot.turns.len(),
                processing: snapshot.processing,
            }
        })
        .collect();

    Json(sessions)
}

/// POST /api/sessions - Create a new session.
async fn api_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionInfo>) {
    let session = state.sessions.create();
    info!(session_id = %session.id(), "Created new session");
    (StatusCode::CREATED, Json(SessionInfo::from(&session)))
}

/// GET /api/sessions/:id - Session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    state
        .sessions
        .get(&id)
        .map(|s| Json(SessionInfo::from(&s)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Longest session id a client may choose.
const MAX_SESSION_ID_LEN: usize = 64;

fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// PUT /api/sessions/:id - Attach to a session, creating it if needed.
///
/// Lets a page keep its id across reloads and server-side expiry.
async fn api_attach_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    if !is_valid_session_id(&id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let session = state.sessions.get_or_create(&id);
    tracing::debug!(session_id = %id, "Session attached");
    Ok(Json(SessionInfo::from(&session)))
}

/// DELETE /api/sessions/:id - Delete a session.
async fn api_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// PUT /api/sessions/:id/input - Mirror the input box.
async fn api_set_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InputRequest>,
) -> Result<StatusCode, StatusCode> {
    lookup(&state, &id)?.set_input(req.text);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sessions/:id/submit - Start answering the current input.
///
/// The answer streams in the background; progress arrives on the events
/// stream.
async fn api_submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<ConversationSnapshot>), (StatusCode, String)> {
    let controller = lookup(&state, &id).map_err(|status| (status, "Session not found".to_string()))?;

    if controller.is_processing() {
        return Err((StatusCode::CONFLICT, Rejection::Busy.to_string()));
    }
    if let Some(message) = req.message {
        // A blank message must not wipe the input box.
        if sanitize_input(&message).is_empty() {
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Rejection::EmptyInput.to_string(),
            ));
        }
        controller.set_input(message);
    }

    match controller.spawn_submit() {
        Ok(_handle) => {
            info!(session_id = %id, "Submission accepted");
            Ok((StatusCode::ACCEPTED, Json(controller.snapshot())))
        }
        Err(rejection) => {
            let status = match rejection {
                Rejection::Busy => StatusCode::CONFLICT,
                Rejection::EmptyInput => StatusCode::UNPROCESSABLE_ENTITY,
            };
            tracing::debug!(session_id = %id, reason = %rejection, "Submission ignored");
            Err((status, rejection.to_string()))
        }
    }
}

/// POST /api/sessions/:id/key - Forward a key press.
async fn api_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<KeyRequest>,
) -> Result<StatusCode, StatusCode> {
    let controller = lookup(&state, &id)?;
    if let Some(input) = req.input {
        controller.set_input(input);
    }
    tokio::spawn(async move {
        controller.handle_key(&req.key).await;
    });
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/sessions/:id/cancel - Abort the in-flight request.
async fn api_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    lookup(&state, &id)?.cancel();
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sessions/:id/clear - Drop the conversation.
async fn api_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    lookup(&state, &id)?.clear();
    info!(session_id = %id, "Conversation cleared");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/sessions/:id/events - SSE stream of conversation changes.
///
/// Starts with a `snapshot` event; a subscriber that falls behind gets a
/// fresh snapshot instead of the events it missed. The stream ends when
/// the session is removed.
async fn api_session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    let controller = lookup(&state, &id)?;
    let (mut rx, snapshot) = controller.subscribe_with_snapshot();
    let closed = controller.closed();
    // The stream must not keep a removed session alive.
    let controller = Arc::downgrade(&controller);

    info!(session_id = %id, "Starting SSE stream");

    let sse_stream = async_stream::stream! {
        yield Ok::<String, Infallible>(sse_event(&ChatEvent::Snapshot(snapshot)));

        tokio::pin!(closed);
        loop {
            let received = tokio::select! {
                biased;
                () = &mut closed => break,
                received = rx.recv() => received,
            };

            match received {
                Ok(event) => yield Ok(sse_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    let Some(controller) = controller.upgrade() else { break };
                    tracing::warn!(session_id = %id, skipped, "SSE subscriber lagged, resending snapshot");
                    yield Ok(sse_event(&ChatEvent::Snapshot(controller.snapshot())));
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!(session_id = %id, "SSE stream ended");
    };

    let body = axum::body::Body::from_stream(sse_stream);
    Ok(build_sse_response(body))
}

fn build_sse_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/event-stream"),
    );
    h.insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    h.insert(
        axum::http::header::CONNECTION,
        axum::http::HeaderValue::from_static("keep-alive"),
    );
    h.insert("X-Accel-Buffering", axum::http::HeaderValue::from_static("no"));
    resp
}
