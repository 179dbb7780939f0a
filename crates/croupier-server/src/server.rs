//! HTTP server - polling API in front of the game server

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use croupier_gateway::Gateway;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers;
use crate::state::AppState;

/// Build the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/connect", get(handlers::connect))
        .route("/update/:id", get(handlers::poll))
        .route("/action/:id", post(handlers::action))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the server until Ctrl-C, then close every game server connection.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address {}: {}", config.bind_addr(), e))?;

    let gateway = Gateway::new(config.gateway.clone());
    let reaper = gateway.start_reaper();
    let state = AppState::new(gateway);
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Backend API is running on http://{}", addr);
    tracing::info!(
        "All requests will be routed to game server at {}",
        config.gateway.remote_addr()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.gateway.shutdown();
    reaper.await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
}
