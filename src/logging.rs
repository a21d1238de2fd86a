use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::http::handlers::SESSION_HEADER;

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let requested_session = session_id_of(request.headers());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();
    // A new session only shows up on the response.
    let session_id = requested_session.or_else(|| session_id_of(response.headers()));

    info!(
        method = %method,
        path = %path,
        session_id = session_id.as_deref().unwrap_or("-"),
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    if status.as_u16() == 404 && path == "/mcp" {
        warn!(
            method = %method,
            session_id = session_id.as_deref().unwrap_or("-"),
            "unknown mcp session"
        );
    }

    response
}

fn session_id_of(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
