//! HTTP/JSON binding of the workflow engine.
//!
//! The caller's identity is resolved upstream and forwarded in the
//! `x-actor-id` / `x-actor-role` headers. Engine calls run on the blocking
//! pool since the stores are synchronous.
use crate::engine::{Actor, TransitionOutcome, WorkflowEngine};
use crate::error::{ErrorKind, WorkflowError};
use crate::history::History;
use crate::store::Store;
use crate::types::{ChecksheetId, ChecksheetKey, ChecksheetKind, Role, UserId};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

type Engine<S> = State<Arc<WorkflowEngine<S>>>;

pub fn router<S: Store + 'static>(engine: Arc<WorkflowEngine<S>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/{kind}/{id}/submit", post(submit::<S>))
        .route("/{kind}/{id}/request-revision", post(request_revision::<S>))
        .route("/{kind}/{id}/resubmit", post(resubmit::<S>))
        .route("/{kind}/{id}/check", post(check::<S>))
        .route("/{kind}/{id}/approve", post(approve::<S>))
        .route("/{kind}/{id}/history", get(history::<S>))
        .route("/revision/{kind}/{id}", put(edit_during_revision::<S>))
        .with_state(engine)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }
    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "authorization_error", message)
    }
    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", message)
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Validation => Self::bad_request(message),
            ErrorKind::Authorization => Self::forbidden(message),
            ErrorKind::NotFound => Self::not_found(message),
            ErrorKind::Conflict => Self::new(StatusCode::CONFLICT, "conflict", message),
            ErrorKind::Persistence => Self::internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionRequest {
    revision_note: Option<String>,
}

#[derive(Deserialize, Default)]
struct NoteRequest {
    note: Option<String>,
}

/// Unknown collections and malformed ids cannot name a checksheet, so both are 404
fn parse_key(kind: &str, id: &str) -> Result<ChecksheetKey, ApiError> {
    let kind = ChecksheetKind::from_collection(kind)
        .ok_or_else(|| ApiError::not_found(format!("unknown checksheet collection '{kind}'")))?;
    let id: ChecksheetId = id
        .parse()
        .map_err(|_| ApiError::not_found(format!("no {kind} with id '{id}'")))?;
    Ok(ChecksheetKey::new(kind, id))
}

fn actor_from(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::forbidden(format!("missing {name} header")))
    };
    let id: UserId = header(ACTOR_ID_HEADER)?
        .parse()
        .map_err(|e: String| ApiError::forbidden(e))?;
    let role: Role = header(ACTOR_ROLE_HEADER)?
        .parse()
        .map_err(|e: String| ApiError::forbidden(e))?;
    Ok(Actor::new(id, role))
}

/// An absent or empty body is treated as `{}`
fn optional_json<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("malformed body: {e}")))
}

async fn blocking<S, T, F>(engine: Arc<WorkflowEngine<S>>, op: F) -> Result<T, ApiError>
where
    S: Store + 'static,
    T: Send + 'static,
    F: FnOnce(&WorkflowEngine<S>) -> Result<T, WorkflowError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&engine))
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn submit<S: Store + 'static>(
    State(engine): Engine<S>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let key = parse_key(&kind, &id)?;
    let actor = actor_from(&headers)?;
    blocking(engine, move |e| e.submit(key, actor)).await.map(Json)
}

async fn request_revision<S: Store + 'static>(
    State(engine): Engine<S>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let key = parse_key(&kind, &id)?;
    let actor = actor_from(&headers)?;
    let request: RevisionRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("malformed body: {e}")))?;
    let note = request
        .revision_note
        .ok_or_else(|| ApiError::bad_request("revisionNote is required"))?;
    blocking(engine, move |e| e.request_revision(key, actor, &note))
        .await
        .map(Json)
}

async fn edit_during_revision<S: Store + 'static>(
    State(engine): Engine<S>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let key = parse_key(&kind, &id)?;
    let actor = actor_from(&headers)?;
    // the engine parses the body after its lookup and role checks
    blocking(engine, move |e| e.edit_during_revision_json(key, actor, &body))
        .await
        .map(Json)
}

async fn resubmit<S: Store + 'static>(
    State(engine): Engine<S>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let key = parse_key(&kind, &id)?;
    let actor = actor_from(&headers)?;
    blocking(engine, move |e| e.resubmit(key, actor)).await.map(Json)
}

async fn check<S: Store + 'static>(
    State(engine): Engine<S>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let key = parse_key(&kind, &id)?;
    let actor = actor_from(&headers)?;
    let request: NoteRequest = optional_json(&body)?;
    blocking(engine, move |e| e.check(key, actor, request.note.as_deref()))
        .await
        .map(Json)
}

async fn approve<S: Store + 'static>(
    State(engine): Engine<S>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let key = parse_key(&kind, &id)?;
    let actor = actor_from(&headers)?;
    let request: NoteRequest = optional_json(&body)?;
    blocking(engine, move |e| e.approve(key, actor, request.note.as_deref()))
        .await
        .map(Json)
}

async fn history<S: Store + 'static>(
    State(engine): Engine<S>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<History>, ApiError> {
    let key = parse_key(&kind, &id)?;
    blocking(engine, move |e| e.history(key)).await.map(Json)
}
