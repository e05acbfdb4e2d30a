use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use boardwalk_core::{SessionContent, SessionId, SessionState};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::coordinator::{SessionDebug, SessionStats};
use crate::error::{ApiError, CoordinatorError};
use crate::websocket::is_valid_session_id;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: SessionId,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_sessions: usize,
    pub active_connections: usize,
    pub sessions: Vec<SessionStats>,
}

fn parse_content(body: &Bytes, required: bool) -> Result<SessionContent, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        if required {
            return Err(ApiError::BadRequest("session document required".into()));
        }
        return Ok(SessionContent::default());
    }
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(err.to_string()))
}

fn checked_id(session_id: String) -> Result<SessionId, ApiError> {
    if is_valid_session_id(&session_id) {
        Ok(session_id)
    } else {
        Err(CoordinatorError::NotFound(session_id).into())
    }
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content = parse_content(&body, false)?;
    let (id, session) = state.registry.create(content).await?;
    info!(session_id = %id, tracks = session.tracks.len(), "session created");
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            id,
            state: session,
            updated_at: None,
        }),
    ))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = checked_id(session_id)?;
    let record = state
        .registry
        .load(&session_id)
        .await?
        .ok_or_else(|| CoordinatorError::NotFound(session_id.clone()))?;
    Ok(Json(SessionResponse {
        id: session_id,
        state: record.state,
        updated_at: Some(record.updated_at),
    }))
}

pub async fn put_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = checked_id(session_id)?;
    let content = parse_content(&body, true)?;
    let session = state.registry.overwrite(&session_id, content).await?;
    Ok(Json(SessionResponse {
        id: session_id,
        state: session,
        updated_at: None,
    }))
}

pub async fn session_debug(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDebug>, ApiError> {
    let session_id = checked_id(session_id)?;
    Ok(Json(state.registry.debug(&session_id).await?))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.registry.stats();
    Json(StatsResponse {
        active_sessions: sessions.len(),
        active_connections: sessions.iter().map(|s| s.connections).sum(),
        sessions,
    })
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
