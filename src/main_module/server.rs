//! HTTP server initialization and routing

use axum::Router;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api_router::configure_api_routes;
use crate::core::shared::state::AppState;

use super::shutdown_signal;

/// Full application: API routes with CORS and request tracing.
pub fn build_app(app_state: Arc<AppState>) -> Router {
    configure_api_routes()
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

pub async fn run_axum_server(app_state: Arc<AppState>) -> std::io::Result<()> {
    let server = &app_state.config.server;
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid bind address {}:{}: {e}", server.host, server.port),
            )
        })?;

    let queue = app_state.queue.clone();
    let app = build_app(app_state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                "Failed to bind to {}: {} - is another instance running?",
                addr, e
            );
            return Err(e);
        }
    };
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)?;

    let pending = queue.pending();
    if pending > 0 {
        warn!(
            "Shutting down with {pending} classification job(s) unfinished on {}",
            queue.name()
        );
    }
    Ok(())
}
