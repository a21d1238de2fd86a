use std::{sync::Arc, time::Duration};

use axum::{middleware, routing::get, Router};

pub mod capability;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod session;
pub mod transport;

use capability::CapabilityRegistry;
use config::Config;
use http::SessionStore;
use mcp::{handler::RequestHandler, server::McpServer};
use session::ServerIdentity;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub server: McpServer,
    pub identity: ServerIdentity,
    /// Declared into every new session before it negotiates.
    pub capabilities: CapabilityRegistry,
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(config: &Config, handler: Arc<dyn RequestHandler>) -> Self {
        let mut identity =
            ServerIdentity::new(config.server_name.clone(), env!("CARGO_PKG_VERSION"));
        if let Some(instructions) = &config.instructions {
            identity = identity.with_instructions(instructions.clone());
        }

        Self {
            sessions: SessionStore::new(config.max_sessions)
                .with_idle_timeout(config.session_idle_timeout),
            server: McpServer::new(handler),
            identity,
            capabilities: config.capabilities.clone(),
            request_timeout: config.request_timeout,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(
            "/mcp",
            get(http::handlers::mcp_get)
                .post(http::handlers::mcp_post)
                .delete(http::handlers::mcp_delete),
        )
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
