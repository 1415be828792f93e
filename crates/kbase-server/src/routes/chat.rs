//! Chat routes: ask a question (whole or streamed), manage sessions.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;
use kbase_runtime::Answer;
use kbase_store::ChatSession;

type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(stream_chat))
        .route("/chat/sessions", get(list_sessions).post(create_session))
        .route(
            "/chat/sessions/{id}",
            get(session_messages).delete(delete_session),
        )
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// POST /api/chat: answer one question, opening a session if none is given.
async fn chat(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<Answer>> {
    let answer = state
        .orchestrator
        .answer(&p, req.session_id.as_deref(), &req.message)
        .await?;
    Ok(Json(answer))
}

/// POST /api/chat/stream: the same flow as `/chat` as server-sent events.
///
/// Events, each a JSON `data:` payload tagged by `type`: `session`, then
/// `sources`, then one `content` per fragment, then `done` carrying the
/// stored assistant message. A failure mid-stream sends `error` instead of
/// `done` and stores no assistant turn. Failures before the first event
/// are ordinary error responses.
async fn stream_chat(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Sse<SseStream>> {
    let mut streamed = state
        .orchestrator
        .answer_stream(&p, req.session_id.as_deref(), &req.message)
        .await?;

    let stream: SseStream = Box::pin(async_stream::stream! {
        yield Ok::<_, Infallible>(event(json!({
            "type": "session",
            "session_id": streamed.session_id,
            "user_message_id": streamed.user_message_id,
            "created_session": streamed.created_session,
        })));
        yield Ok(event(json!({ "type": "sources", "sources": streamed.citations })));

        let mut reply = String::new();
        while let Some(fragment) = streamed.next_token().await {
            match fragment {
                Ok(text) => {
                    reply.push_str(&text);
                    yield Ok(event(json!({ "type": "content", "content": text })));
                }
                Err(e) => {
                    warn!("Session {}: stream failed: {}", streamed.session_id, e);
                    yield Ok(event(json!({ "type": "error", "error": e.to_string() })));
                    return;
                }
            }
        }

        match state.orchestrator.finish_stream(&streamed, &reply) {
            Ok(message) => {
                yield Ok(event(json!({ "type": "done", "message": message })));
            }
            Err(e) => {
                warn!("Session {}: answer not stored: {}", streamed.session_id, e);
                yield Ok(event(json!({ "type": "error", "error": e.to_string() })));
            }
        }
    });

    Ok(Sse::new(stream))
}

fn event(payload: Value) -> Event {
    Event::default().data(payload.to_string())
}

/// GET /api/chat/sessions: the caller's sessions, most recent first.
async fn list_sessions(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
) -> ApiResult<Json<Value>> {
    let sessions = state.store.list_sessions(p.user_id)?;
    Ok(Json(json!({ "sessions": sessions })))
}

#[derive(Deserialize, Default)]
struct NewSession {
    #[serde(default)]
    title: Option<String>,
}

/// POST /api/chat/sessions
async fn create_session(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    body: Option<Json<NewSession>>,
) -> ApiResult<(StatusCode, Json<ChatSession>)> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let session = state.store.create_session(p.user_id, req.title.as_deref())?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/chat/sessions/{id}: messages in order. Foreign sessions are 404.
async fn session_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let messages = state.store.list_messages_for(&p, &id)?;
    Ok(Json(json!({ "session_id": id, "messages": messages })))
}

/// DELETE /api/chat/sessions/{id}
async fn delete_session(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.delete_session(&id, &p)?;
    Ok(Json(json!({ "deleted": id })))
}
