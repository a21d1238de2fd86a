//! Axum HTTP handlers for the web server
//!
//! `/mcp` binds HTTP requests to sessions through the `Mcp-Session-Id` header.
//! The remaining routes are public metadata.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::capability::CapabilityDescriptor;
use crate::errors::AppError;
use crate::mcp::rpc::{json_rpc_error, json_rpc_error_with_data, INVALID_REQUEST, PARSE_ERROR};
use crate::session::negotiation::SUPPORTED_PROTOCOL_VERSIONS;
use crate::session::{Session, SessionState};
use crate::AppState;

pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: String,
    pub version: String,
    pub mcp_endpoint: &'static str,
    pub protocol_versions: &'static [&'static str],
    pub capabilities: CapabilityDescriptor,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: state.identity.name.clone(),
        version: state.identity.version.clone(),
        mcp_endpoint: "/mcp",
        protocol_versions: &SUPPORTED_PROTOCOL_VERSIONS,
        capabilities: state.capabilities.pending().clone(),
    })
}

pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match session_id(&headers) {
        Some(id) => {
            let session = match live_session(&state, &id).await {
                Ok(session) => session,
                Err(err) => return err.into_response(),
            };
            frame_response(state.server.handle_frame(&session, &body).await, None)
        }
        None => open_session(&state, &body).await,
    }
}

/// Without a session header only `initialize` is accepted, and it opens a session.
async fn open_session(state: &AppState, body: &[u8]) -> Response {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json_rpc_error(None, PARSE_ERROR, "Parse error")),
            )
                .into_response()
        }
    };

    if !is_initialize_request(&payload) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json_rpc_error_with_data(
                payload.get("id").cloned(),
                INVALID_REQUEST,
                "Invalid Request",
                Some(json!({
                    "code": "missing_session",
                    "message": "send initialize first or provide the mcp-session-id header",
                    "details": {},
                })),
            )),
        )
            .into_response();
    }

    let session = match state
        .sessions
        .create(
            state.identity.clone(),
            state.capabilities.clone(),
            state.request_timeout,
        )
        .await
    {
        Ok(session) => session,
        Err(err) => return err.into_response(),
    };

    let response = state.server.handle_json_rpc_value(&session, payload).await;
    let frame = response.and_then(|response| serde_json::to_vec(&response).ok());

    if session.state() == SessionState::Ready {
        frame_response(frame, Some(session.id()))
    } else {
        state.sessions.remove(session.id()).await;
        frame_response(frame, None)
    }
}

pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return missing_session_header().into_response();
    };

    match state.sessions.drain_outbound(&id).await {
        Some(frames) if frames.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Some(frames) => (StatusCode::OK, Json(Value::Array(frames))).into_response(),
        None => unknown_session().into_response(),
    }
}

pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return missing_session_header().into_response();
    };

    match state.sessions.remove(&id).await {
        Some(session) => {
            session.close().await;
            StatusCode::NO_CONTENT.into_response()
        }
        None => unknown_session().into_response(),
    }
}

async fn live_session(state: &AppState, id: &str) -> Result<std::sync::Arc<Session>, AppError> {
    let session = state.sessions.get(id).await.ok_or_else(unknown_session)?;
    if session.state().is_terminal() {
        state.sessions.remove(id).await;
        return Err(unknown_session());
    }
    Ok(session)
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn is_initialize_request(payload: &Value) -> bool {
    payload.get("method").and_then(Value::as_str) == Some("initialize")
        && payload.get("id").is_some()
}

fn frame_response(frame: Option<Vec<u8>>, new_session: Option<&str>) -> Response {
    let mut response = match frame {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    };

    if let Some(value) = new_session.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn missing_session_header() -> AppError {
    AppError::bad_request("missing_session", "mcp-session-id header is required")
}

fn unknown_session() -> AppError {
    AppError::not_found("session_not_found", "unknown or ended mcp session")
}
