// crates/server/src/routes/mod.rs
//! API route handlers for the benchstream server.

pub mod bench;
pub mod health;
pub mod metrics;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Routes:
/// - GET  /api/health
/// - POST /api/bench/start
/// - GET  /api/bench/status/{id}
/// - GET  /api/bench/history?limit=
/// - GET  /api/bench/logs/{id}?offset=&limit=
/// - GET  /api/bench/ws/{id} (WebSocket)
/// - GET  /metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", bench::router())
        .nest("/api", ws::router())
        .merge(metrics::router())
        .with_state(state)
}
