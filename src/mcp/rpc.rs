//! JSON-RPC envelopes and error mapping
//!
//! Parses inbound frames into [`ParsedMessage`] and maps core and handler errors
//! onto stable JSON-RPC error objects. Internal causes never reach the wire.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcMessage, JsonrpcResultResponse, RequestId, Result as McpResult,
    RpcError,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{HandlerError, ProtocolError};
use crate::session::negotiation::SUPPORTED_PROTOCOL_VERSIONS;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const REQUEST_TIMEOUT: i32 = -32001;
pub const SESSION_NOT_READY: i32 = -32002;
pub const SESSION_CLOSED: i32 = -32003;

#[derive(Debug)]
pub enum ParsedMessage {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Value,
        outcome: Result<Value, ProtocolError>,
    },
    /// Not a valid message. Carries the error response, if one is owed.
    Invalid { response: Option<Value> },
}

#[derive(Debug, Deserialize)]
struct IncomingResponse {
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<IncomingError>,
}

#[derive(Debug, Deserialize)]
struct IncomingError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

pub fn parse_message(payload: Value) -> ParsedMessage {
    if !payload.is_object() {
        return invalid_request(None);
    }

    let request_id = payload.get("id").cloned();
    let is_response = payload.get("method").is_none()
        && (payload.get("result").is_some() || payload.get("error").is_some());
    if is_response {
        return match serde_json::from_value::<IncomingResponse>(payload) {
            Ok(response) => ParsedMessage::Response {
                id: response.id,
                outcome: match response.error {
                    Some(error) => Err(ProtocolError::Peer {
                        code: error.code,
                        message: error.message,
                        data: error.data,
                    }),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                },
            },
            // Responses are never answered, not even with an error.
            Err(_) => ParsedMessage::Invalid { response: None },
        };
    }

    let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => return invalid_request(request_id),
    };

    match parsed {
        JsonrpcMessage::Request(request) => {
            let id = request_id_to_value(request.id);
            if request.method.trim().is_empty() {
                return invalid_request(Some(id));
            }

            ParsedMessage::Request {
                id,
                method: request.method,
                params: request.params.map(Value::Object),
            }
        }
        JsonrpcMessage::Notification(notification) => {
            if notification.method.trim().is_empty() {
                return ParsedMessage::Invalid { response: None };
            }

            ParsedMessage::Notification {
                method: notification.method,
                params: notification.params.map(Value::Object),
            }
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
            invalid_request(request_id)
        }
    }
}

fn invalid_request(id: Option<Value>) -> ParsedMessage {
    ParsedMessage::Invalid {
        response: Some(json_rpc_error(id, INVALID_REQUEST, "Invalid Request")),
    }
}

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

fn error_data(code: &str, message: impl Into<String>, details: Value) -> Option<Value> {
    Some(json!({
        "code": code,
        "message": message.into(),
        "details": details,
    }))
}

pub fn protocol_error_to_json_rpc(id: Option<Value>, err: &ProtocolError) -> Value {
    let code = err.code();
    match err {
        ProtocolError::UnsupportedProtocolVersion { requested, closest } => {
            json_rpc_error_with_data(
                id,
                INVALID_PARAMS,
                "Unsupported protocol version",
                error_data(
                    code,
                    err.to_string(),
                    json!({
                        "requested": requested,
                        "closest": closest,
                        "supported": SUPPORTED_PROTOCOL_VERSIONS,
                    }),
                ),
            )
        }
        ProtocolError::AlreadyNegotiated => json_rpc_error_with_data(
            id,
            INVALID_REQUEST,
            "Invalid Request",
            error_data(code, err.to_string(), json!({})),
        ),
        ProtocolError::CapabilityNotSupported { method } => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            error_data(code, err.to_string(), json!({ "method": method })),
        ),
        ProtocolError::SessionNotReady => json_rpc_error_with_data(
            id,
            SESSION_NOT_READY,
            "Session not ready",
            error_data(code, err.to_string(), json!({})),
        ),
        ProtocolError::SessionClosed => json_rpc_error_with_data(
            id,
            SESSION_CLOSED,
            "Session closed",
            error_data(code, err.to_string(), json!({})),
        ),
        ProtocolError::InvalidParams(message) => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            error_data(code, message.as_str(), json!({})),
        ),
        ProtocolError::RequestTimeout(_) => json_rpc_error_with_data(
            id,
            REQUEST_TIMEOUT,
            "Request timed out",
            error_data(code, err.to_string(), json!({})),
        ),
        ProtocolError::Handler(handler_error) => handler_error_to_json_rpc(id, handler_error),
        ProtocolError::Peer { .. } | ProtocolError::Transport(_) => {
            tracing::error!(error = %err, "request failed with internal error");
            json_rpc_error(id, INTERNAL_ERROR, "Internal error")
        }
    }
}

pub fn handler_error_to_json_rpc(id: Option<Value>, err: &HandlerError) -> Value {
    match err {
        HandlerError::MethodNotFound(_) => json_rpc_error(id, METHOD_NOT_FOUND, "Method not found"),
        HandlerError::ToolNotFound(name) => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            error_data(err.code(), "unknown tool name", json!({ "name": name })),
        ),
        HandlerError::ResourceNotFound(uri) => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            error_data(err.code(), "unknown resource uri", json!({ "uri": uri })),
        ),
        HandlerError::PromptNotFound(name) => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            error_data(err.code(), "unknown prompt name", json!({ "name": name })),
        ),
        HandlerError::InvalidParams { code, message } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            error_data(code, message.as_str(), json!({})),
        ),
        HandlerError::Internal(message) => {
            tracing::error!(error = %message, "handler failed with internal error");
            json_rpc_error(id, INTERNAL_ERROR, "Internal error")
        }
    }
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    let response = JsonrpcErrorResponse::new(
        RpcError {
            code: i64::from(code),
            data,
            message: message.to_string(),
        },
        id.as_ref().and_then(value_to_request_id),
    );
    serde_json::to_value(response).expect("jsonrpc error response serialization")
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    // The sdk result type only models objects; anything else goes out as is.
    if let (Some(request_id), Value::Object(fields)) =
        (id.as_ref().and_then(value_to_request_id), &result)
    {
        let extra = Some(fields.clone());
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        return serde_json::to_value(response).expect("jsonrpc result response serialization");
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn json_rpc_notification(method: &str, params: Option<Value>) -> Value {
    let mut message = json!({
        "jsonrpc": "2.0",
        "method": method,
    });
    if let Some(params) = params {
        message["params"] = params;
    }
    message
}

pub fn json_rpc_request(id: i64, method: &str, params: Option<Value>) -> Value {
    let mut message = json_rpc_notification(method, params);
    message["id"] = json!(id);
    message
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}
