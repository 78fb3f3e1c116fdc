// crates/server/src/routes/health.rs
//! GET /api/health

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use benchstream_core::bounded;
use serde::Serialize;

use crate::state::AppState;

const CHECK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the history store does not answer.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub durable_store: &'static str,
    /// Jobs with at least one live subscriber.
    pub live_jobs: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let durable_ok = bounded("query_jobs", CHECK_TIMEOUT, state.durable.query_jobs(1))
        .await
        .is_ok();
    Json(HealthResponse {
        status: if durable_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        durable_store: if durable_ok { "ok" } else { "unavailable" },
        live_jobs: state.hub.group_count(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
