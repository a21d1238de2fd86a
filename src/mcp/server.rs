//! The central Model Context Protocol dispatcher
//!
//! Decodes frames, runs `initialize` through the session, authorizes every other
//! call against the negotiated capabilities and routes it to the core or to the
//! [`RequestHandler`]. Requests get exactly one response, notifications none.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::errors::ProtocolError;
use crate::mcp::handler::{RequestContext, RequestHandler};
use crate::mcp::rpc::{
    is_json_rpc_error, json_rpc_error, json_rpc_result, parse_message, protocol_error_to_json_rpc,
    ParsedMessage, INVALID_REQUEST, PARSE_ERROR,
};
use crate::session::{LogLevel, Session, SessionState};

#[derive(Debug, Deserialize)]
struct SetLevelParams {
    level: LogLevel,
}

#[derive(Debug, Deserialize)]
struct UriParams {
    uri: String,
}

#[derive(Clone)]
pub struct McpServer {
    handler: Arc<dyn RequestHandler>,
}

impl McpServer {
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self { handler }
    }

    /// Handles one raw frame from the transport. `None` means nothing is owed.
    ///
    /// A frame that is not JSON at all is a protocol violation and fails the session.
    pub async fn handle_frame(&self, session: &Session, frame: &[u8]) -> Option<Vec<u8>> {
        let response = match serde_json::from_slice::<Value>(frame) {
            Ok(Value::Array(batch)) => self.handle_batch(session, batch).await,
            Ok(payload) => self.handle_json_rpc_value(session, payload).await,
            Err(err) => {
                debug!(session_id = %session.id(), error = %err, "frame is not valid json");
                session.fail("malformed frame").await;
                Some(json_rpc_error(None, PARSE_ERROR, "Parse error"))
            }
        }?;

        serde_json::to_vec(&response).ok()
    }

    pub async fn handle_batch(&self, session: &Session, batch: Vec<Value>) -> Option<Value> {
        if batch.is_empty() {
            return Some(json!([json_rpc_error(None, INVALID_REQUEST, "Invalid Request")]));
        }

        let mut responses = Vec::new();
        for payload in batch {
            if let Some(response) = self.handle_json_rpc_value(session, payload).await {
                responses.push(response);
            }
        }

        if responses.is_empty() {
            None
        } else {
            Some(Value::Array(responses))
        }
    }

    pub async fn handle_json_rpc_value(&self, session: &Session, payload: Value) -> Option<Value> {
        match parse_message(payload) {
            ParsedMessage::Request { id, method, params } => {
                Some(self.handle_json_rpc_request(session, id, method, params).await)
            }
            ParsedMessage::Notification { method, params } => {
                self.handle_notification(session, &method, params).await;
                None
            }
            ParsedMessage::Response { id, outcome } => {
                if !session.complete_request(&id, outcome) {
                    debug!(
                        session_id = %session.id(),
                        id = %id,
                        "response for unknown request dropped"
                    );
                }
                None
            }
            ParsedMessage::Invalid { response } => response,
        }
    }

    pub async fn handle_json_rpc_request(
        &self,
        session: &Session,
        id: Value,
        method: String,
        params: Option<Value>,
    ) -> Value {
        let audit_params = redact_audit_params(params.as_ref());

        let response = match self.dispatch(session, &method, params).await {
            Ok(result) => json_rpc_result(Some(id), result),
            Err(err) => {
                // A failed handshake leaves nothing to talk to.
                if method == "initialize" && session.state() == SessionState::Failed {
                    session.transport().close().await;
                }
                protocol_error_to_json_rpc(Some(id), &err)
            }
        };

        info!(
            session_id = %session.id(),
            method = %method,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    async fn dispatch(
        &self,
        session: &Session,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        match method {
            "initialize" => {
                let result = session.negotiate(params)?;
                warn_deprecated_features(session);
                return serde_json::to_value(result)
                    .map_err(|err| ProtocolError::InvalidParams(err.to_string()));
            }
            "ping" => {
                return if session.state().is_terminal() {
                    Err(ProtocolError::SessionClosed)
                } else {
                    Ok(json!({}))
                };
            }
            _ => {}
        }

        session.authorize_inbound(method)?;

        match method {
            "logging/setLevel" => {
                let params: SetLevelParams = parse_params(params)?;
                session.set_log_level(params.level)?;
                Ok(json!({}))
            }
            "resources/subscribe" => {
                let params: UriParams = parse_params(params)?;
                session.subscribe(&params.uri)?;
                Ok(json!({}))
            }
            "resources/unsubscribe" => {
                let params: UriParams = parse_params(params)?;
                session.unsubscribe(&params.uri)?;
                Ok(json!({}))
            }
            _ => {
                let ctx = request_context(session);
                let result = self.handler.handle_request(method, params, &ctx).await;

                // The session may have been closed while the handler ran.
                if session.state().is_terminal() {
                    return Err(ProtocolError::SessionClosed);
                }
                Ok(result?)
            }
        }
    }

    async fn handle_notification(&self, session: &Session, method: &str, params: Option<Value>) {
        match method {
            "notifications/initialized" | "notifications/cancelled" => {
                debug!(session_id = %session.id(), method, "client notification accepted");
                return;
            }
            _ => {}
        }

        if let Err(err) = session.authorize_inbound(method) {
            debug!(
                session_id = %session.id(),
                method,
                error = %err,
                "client notification dropped"
            );
            return;
        }

        let ctx = request_context(session);
        self.handler.handle_notification(method, params, &ctx).await;
    }
}

fn request_context(session: &Session) -> RequestContext {
    RequestContext {
        session_id: session.id().to_string(),
        protocol_version: session
            .local_capabilities()
            .map(|set| set.protocol_version().to_string())
            .unwrap_or_default(),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|err| ProtocolError::InvalidParams(err.to_string()))
}

fn warn_deprecated_features(session: &Session) {
    let Some(local) = session.local_capabilities() else {
        return;
    };

    let today = Utc::now().date_naive();
    for (name, feature) in &local.descriptor().experimental {
        if feature.enabled && feature.is_deprecated_on(today) {
            warn!(
                session_id = %session.id(),
                feature = %name,
                deprecation_date = ?feature.deprecation_date,
                "negotiated deprecated experimental feature"
            );
        }
    }
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::capability::{Capability, CapabilityRegistry};
    use crate::errors::HandlerError;
    use crate::session::ServerIdentity;
    use crate::transport::ChannelTransport;

    #[derive(Default)]
    struct RecordingHandler {
        notifications: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for RecordingHandler {
        async fn handle_request(
            &self,
            method: &str,
            _params: Option<Value>,
            ctx: &RequestContext,
        ) -> Result<Value, HandlerError> {
            match method {
                "tools/list" => Ok(json!({ "tools": [], "protocol": ctx.protocol_version })),
                "tools/call" => Err(HandlerError::ToolNotFound("missing".to_string())),
                "custom/list" => Ok(json!([1, 2, 3])),
                other => Err(HandlerError::MethodNotFound(other.to_string())),
            }
        }

        async fn handle_notification(
            &self,
            _method: &str,
            _params: Option<Value>,
            _ctx: &RequestContext,
        ) {
            self.notifications.fetch_add(1, Ordering::Relaxed);
        }
    }

    type Setup = (McpServer, Arc<RecordingHandler>, Session, Receiver<Vec<u8>>);

    fn setup(capabilities: Vec<Capability>) -> Setup {
        let mut registry = CapabilityRegistry::new();
        for capability in capabilities {
            registry.declare(capability).expect("declare");
        }
        let (transport, receiver) = ChannelTransport::new();
        let session = Session::new(
            "dispatch-1",
            ServerIdentity::new("test-server", "0.1.0"),
            registry,
            Arc::new(transport),
        );
        session.connect().expect("connect");

        let handler = Arc::new(RecordingHandler::default());
        (McpServer::new(handler.clone()), handler, session, receiver)
    }

    fn initialize(id: i64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": { "roots": { "listChanged": true } },
                "clientInfo": { "name": "client", "version": "1.0.0" }
            }
        })
    }

    async fn call(server: &McpServer, session: &Session, message: Value) -> Option<Value> {
        server.handle_json_rpc_value(session, message).await
    }

    fn set_level(id: i64, level: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "logging/setLevel",
            "params": { "level": level }
        })
    }

    #[tokio::test]
    async fn initialize_then_handler_request() {
        let (server, _, session, _receiver) = setup(vec![Capability::tools(false)]);

        let response = call(&server, &session, initialize(1)).await.expect("response");
        assert_eq!(response["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(response["result"]["serverInfo"]["name"], "test-server");

        let response = call(
            &server,
            &session,
            json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        )
        .await
        .expect("response");
        assert_eq!(response["result"]["protocol"], "2025-03-26");
    }

    #[tokio::test]
    async fn ping_is_answered_before_ready() {
        let (server, _, session, _receiver) = setup(vec![]);
        let ping = json!({ "jsonrpc": "2.0", "id": "p", "method": "ping" });
        let response = call(&server, &session, ping).await.expect("response");
        assert_eq!(response["id"], "p");
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn requests_before_initialize_are_not_ready() {
        let (server, _, session, _receiver) = setup(vec![Capability::tools(false)]);
        let response = call(
            &server,
            &session,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
        )
        .await
        .expect("response");
        assert_eq!(response["error"]["data"]["code"], "session_not_ready");
    }

    #[tokio::test]
    async fn set_level_without_logging_is_capability_error() {
        let (server, _, session, _receiver) = setup(vec![Capability::tools(false)]);
        call(&server, &session, initialize(1)).await;

        let response = call(
            &server,
            &session,
            set_level(2, "debug"),
        )
        .await
        .expect("response");
        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["error"]["data"]["code"], "capability_not_supported");
        assert_eq!(response["error"]["data"]["details"]["method"], "logging/setLevel");
    }

    #[tokio::test]
    async fn set_level_validates_the_level() {
        let (server, _, session, _receiver) = setup(vec![Capability::Logging]);
        call(&server, &session, initialize(1)).await;

        let response = call(
            &server,
            &session,
            set_level(2, "loud"),
        )
        .await
        .expect("response");
        assert_eq!(response["error"]["code"], -32602);

        let response = call(
            &server,
            &session,
            set_level(3, "error"),
        )
        .await
        .expect("response");
        assert_eq!(response["result"], json!({}));
        assert_eq!(session.min_log_level(), LogLevel::Error);
    }

    #[tokio::test]
    async fn unknown_tool_is_distinct_from_capability_errors() {
        let (server, _, session, _receiver) = setup(vec![Capability::tools(false)]);
        call(&server, &session, initialize(1)).await;

        let response = call(
            &server,
            &session,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": "missing" }
            }),
        )
        .await
        .expect("response");
        assert_eq!(response["error"]["data"]["code"], "tool_not_found");
    }

    #[tokio::test]
    async fn client_cannot_call_methods_it_serves_itself() {
        let (server, _, session, _receiver) = setup(vec![Capability::tools(false)]);
        let mut init = initialize(1);
        init["params"]["capabilities"] = json!({ "sampling": {}, "roots": {} });
        call(&server, &session, init).await;

        for (id, method) in [(2, "sampling/createMessage"), (3, "roots/list")] {
            let response = call(
                &server,
                &session,
                json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": {} }),
            )
            .await
            .expect("response");
            assert_eq!(response["error"]["code"], -32601);
            assert_eq!(response["error"]["data"]["code"], "capability_not_supported");
            assert_eq!(response["error"]["data"]["details"]["method"], method);
        }
    }

    #[tokio::test]
    async fn non_object_handler_results_are_passed_through() {
        let (server, _, session, _receiver) = setup(vec![]);
        call(&server, &session, initialize(1)).await;

        let response = call(
            &server,
            &session,
            json!({ "jsonrpc": "2.0", "id": 2, "method": "custom/list" }),
        )
        .await
        .expect("response");
        assert_eq!(response["result"], json!([1, 2, 3]));
        assert_eq!(response["id"], 2);
    }

    #[tokio::test]
    async fn duplicate_initialize_fails_and_closes_the_transport() {
        let (server, _, session, _receiver) = setup(vec![]);
        call(&server, &session, initialize(1)).await;

        let response = call(&server, &session, initialize(2)).await.expect("response");
        assert_eq!(response["error"]["data"]["code"], "already_negotiated");
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.transport().send_frame(b"{}".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn malformed_frames_fail_the_session() {
        let (server, _, session, _receiver) = setup(vec![]);
        call(&server, &session, initialize(1)).await;

        let response = server.handle_frame(&session, b"{not json").await.expect("response");
        let response: Value = serde_json::from_slice(&response).expect("json");
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let (server, handler, session, _receiver) = setup(vec![]);
        call(&server, &session, initialize(1)).await;

        assert!(call(
            &server,
            &session,
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
        )
        .await
        .is_none());
        assert!(call(
            &server,
            &session,
            json!({ "jsonrpc": "2.0", "method": "notifications/roots/list_changed" })
        )
        .await
        .is_none());
        assert!(call(
            &server,
            &session,
            json!({ "jsonrpc": "2.0", "method": "notifications/custom" })
        )
        .await
        .is_none());
        // initialized is a core no-op; roots/list_changed and custom reach the handler
        assert_eq!(handler.notifications.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn batches_collect_request_responses_only() {
        let (server, _, session, _receiver) = setup(vec![]);
        let batch = json!([
            initialize(1),
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            { "jsonrpc": "2.0", "id": 2, "method": "ping" }
        ]);

        let response = server
            .handle_frame(&session, &serde_json::to_vec(&batch).expect("encode"))
            .await
            .expect("response");
        let response: Value = serde_json::from_slice(&response).expect("json");
        assert_eq!(response.as_array().map(Vec::len), Some(2));

        let empty = server.handle_frame(&session, b"[]").await.expect("response");
        let empty: Value = serde_json::from_slice(&empty).expect("json");
        assert_eq!(empty[0]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn responses_complete_outbound_requests() {
        let (server, _, session, mut receiver) = setup(vec![]);
        call(&server, &session, initialize(1)).await;
        let session = Arc::new(session);

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("roots/list", None).await })
        };
        let frame = receiver.recv().await.expect("outbound request");
        let frame: Value = serde_json::from_slice(&frame).expect("json");

        let reply = json!({ "jsonrpc": "2.0", "id": frame["id"], "result": { "roots": [] } });
        assert!(call(&server, &session, reply).await.is_none());
        assert_eq!(
            waiter.await.expect("join").expect("result"),
            json!({ "roots": [] })
        );
    }

    #[test]
    fn redacts_sensitive_fields_in_audit_params() {
        let params = json!({
            "name": "echo",
            "arguments": {
                "text": "hello",
                "token": "should-not-appear",
                "api_key": "should-not-appear",
                "nested": {
                    "client_secret": "should-not-appear"
                }
            }
        });

        let redacted = redact_audit_params(Some(&params));

        assert_eq!(redacted["name"], json!("echo"));
        assert_eq!(redacted["arguments"]["text"], json!("hello"));
        assert_eq!(redacted["arguments"]["token"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["api_key"], json!("[REDACTED]"));
        assert_eq!(
            redacted["arguments"]["nested"]["client_secret"],
            json!("[REDACTED]")
        );
    }
}
