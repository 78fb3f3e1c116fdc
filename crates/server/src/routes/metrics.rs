// crates/server/src/routes/metrics.rs
//! Prometheus scrape target, mounted at the root as `/metrics`.

use std::sync::Arc;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::state::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn scrape() -> Response {
    let Some(body) = crate::metrics::render_metrics() else {
        // `serve` installs the recorder; tests and `demo` do not.
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_TEXT)], body).into_response()
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}
