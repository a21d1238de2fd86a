//! Application seam behind the dispatcher
//!
//! The dispatcher answers the lifecycle and capability-core methods itself and
//! hands every authorized request it does not own to a [`RequestHandler`].

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::HandlerError;

/// Per-call facts about the session a request arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub session_id: String,
    pub protocol_version: String,
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Serves an authorized request and returns the `result` payload.
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> Result<Value, HandlerError>;

    /// Client notifications that passed the guard. Ignored by default.
    async fn handle_notification(
        &self,
        _method: &str,
        _params: Option<Value>,
        _ctx: &RequestContext,
    ) {
    }
}
