use std::sync::Arc;

use mcp_session_core::{build_app, config::Config, domain::Catalog, logging, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;
    let catalog = Arc::new(Catalog::builtin(&config.server_name));
    let state = AppState::new(&config, catalog);
    if let Some(idle) = config.session_idle_timeout {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(idle / 2);
            loop {
                ticker.tick().await;
                sessions.prune_idle().await;
            }
        });
    }
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        server_name = %config.server_name,
        max_sessions = config.max_sessions,
        session_idle_secs = ?config.session_idle_timeout.map(|idle| idle.as_secs()),
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
