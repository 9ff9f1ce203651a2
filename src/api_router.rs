//! Unified REST router

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::main_module::health_check;
use crate::tickets::configure_tickets_routes;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health_check))
        .merge(configure_tickets_routes())
}
