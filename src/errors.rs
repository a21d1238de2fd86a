use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Session and protocol level failures raised by the core.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version {requested}, closest supported is {closest}")]
    UnsupportedProtocolVersion {
        requested: String,
        closest: &'static str,
    },
    #[error("session has already been negotiated")]
    AlreadyNegotiated,
    #[error("capability not supported for method {method}")]
    CapabilityNotSupported { method: String },
    #[error("session is not ready")]
    SessionNotReady,
    #[error("session is closed")]
    SessionClosed,
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("peer returned error {code}: {message}")]
    Peer {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    pub fn capability_not_supported(method: &str) -> Self {
        Self::CapabilityNotSupported {
            method: method.to_string(),
        }
    }

    /// Errors after which the session moves to `Failed` and the transport is closed.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedProtocolVersion { .. } | Self::AlreadyNegotiated
        )
    }

    /// Stable machine-readable code carried in the wire error `data.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedProtocolVersion { .. } => "unsupported_protocol_version",
            Self::AlreadyNegotiated => "already_negotiated",
            Self::CapabilityNotSupported { .. } => "capability_not_supported",
            Self::SessionNotReady => "session_not_ready",
            Self::SessionClosed => "session_closed",
            Self::InvalidParams(_) => "invalid_params",
            Self::RequestTimeout(_) => "request_timeout",
            Self::Peer { .. } => "peer_error",
            Self::Handler(err) => err.code(),
            Self::Transport(_) => "transport_error",
        }
    }
}

/// Domain errors reported by handler collaborators.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("prompt not found: {0}")]
    PromptNotFound(String),
    #[error("bad request: {message}")]
    InvalidParams {
        code: &'static str,
        message: String,
    },
    #[error("internal error")]
    Internal(String),
}

impl HandlerError {
    pub fn invalid_params(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MethodNotFound(_) => "method_not_found",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::PromptNotFound(_) => "prompt_not_found",
            Self::InvalidParams { code, .. } => *code,
            Self::Internal(_) => "internal_error",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("outbound queue is full")]
    Full,
    #[error("failed to send frame: {0}")]
    Send(String),
}

/// HTTP-level failures of the transport binding, outside JSON-RPC.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: &'static str,
    },
    #[error("not found: {message}")]
    NotFound {
        code: &'static str,
        message: &'static str,
    },
    #[error("unavailable: {message}")]
    Unavailable {
        code: &'static str,
        message: &'static str,
    },
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: &'static str) -> Self {
        Self::BadRequest { code, message }
    }

    pub fn not_found(code: &'static str, message: &'static str) -> Self {
        Self::NotFound { code, message }
    }

    pub fn unavailable(code: &'static str, message: &'static str) -> Self {
        Self::Unavailable { code, message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, code, message.to_string())
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message.to_string()),
            Self::Unavailable { code, message } => {
                (StatusCode::SERVICE_UNAVAILABLE, code, message.to_string())
            }
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}
