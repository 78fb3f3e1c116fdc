// crates/server/src/routes/bench.rs
//! Benchmark job endpoints.
//!
//! - POST /bench/start: enqueue a job
//! - GET /bench/status/{id}: live view from the ephemeral store
//! - GET /bench/history: reconciled jobs, newest first
//! - GET /bench/logs/{id}: reconciled log rows

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use benchstream_types::{JobRecord, JobSnapshot, LogRow};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const REQUIRED_FIELDS: [&str; 4] = ["mode", "url", "concurrency", "duration"];
const MODES: [&str; 2] = ["http", "playwright"];

/// Parameters handed to the load tool. Optional knobs get the load tool's
/// own defaults so the stored params are complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchParams {
    pub mode: String,
    pub url: String,
    pub concurrency: u32,
    pub duration: u64,
    #[serde(default = "default_sample_interval")]
    pub sample_interval: f64,
    #[serde(default = "default_think_time")]
    pub think_time: f64,
    #[serde(default = "default_screenshot_interval")]
    pub screenshot_interval: f64,
    #[serde(default = "default_targets")]
    pub targets: Vec<u64>,
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
    #[serde(default = "default_baseline_os_mem_bytes")]
    pub baseline_os_mem_bytes: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_runs_per_day")]
    pub runs_per_day: u32,
}

fn default_sample_interval() -> f64 {
    1.0
}
fn default_think_time() -> f64 {
    1.0
}
fn default_screenshot_interval() -> f64 {
    2.0
}
fn default_targets() -> Vec<u64> {
    vec![10, 50, 100, 1000]
}
fn default_safety_factor() -> f64 {
    1.5
}
fn default_baseline_os_mem_bytes() -> u64 {
    512 * 1024 * 1024
}
fn default_retention_days() -> u32 {
    7
}
fn default_runs_per_day() -> u32 {
    24
}

impl BenchParams {
    /// Check presence first so the message names the missing field, then
    /// decode and validate values.
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, String> {
        let obj = payload
            .as_object()
            .ok_or_else(|| "request body must be a JSON object".to_string())?;
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !obj.contains_key(**f)) {
            return Err(format!("{missing} is required"));
        }
        let params: BenchParams =
            serde_json::from_value(payload).map_err(|e| format!("invalid parameters: {e}"))?;

        if !MODES.contains(&params.mode.as_str()) {
            return Err(format!("mode must be one of {}", MODES.join(", ")));
        }
        if !(params.url.starts_with("http://") || params.url.starts_with("https://")) {
            return Err("url must start with http:// or https://".into());
        }
        if params.concurrency == 0 {
            return Err("concurrency must be at least 1".into());
        }
        if params.duration == 0 {
            return Err("duration must be at least 1".into());
        }
        Ok(params)
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct StartResponse {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    100
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct HistoryResponse {
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_logs_limit")]
    pub limit: u32,
}

fn default_logs_limit() -> u32 {
    1000
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct LogsResponse {
    pub job_id: String,
    pub logs: Vec<LogRow>,
}

/// POST /api/bench/start
async fn start(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let params = BenchParams::from_payload(payload).map_err(ApiError::BadRequest)?;
    let value = serde_json::to_value(&params).map_err(|e| ApiError::Internal(e.to_string()))?;
    let job_id = state.queue.start_job(value).await?;
    tracing::info!(job_id = %job_id, mode = %params.mode, url = %params.url, "Benchmark job queued");
    Ok((StatusCode::ACCEPTED, Json(StartResponse { job_id })))
}

/// GET /api/bench/status/{id}
async fn status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    state
        .queue
        .get_job(&job_id)
        .await?
        .map(Json)
        .ok_or(ApiError::JobNotFound(job_id))
}

/// GET /api/bench/history?limit=
async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let jobs = state.durable.query_jobs(query.limit).await?;
    Ok(Json(HistoryResponse { jobs }))
}

/// GET /api/bench/logs/{id}?offset=&limit=
async fn logs(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let logs = state
        .durable
        .query_logs(&job_id, query.offset, query.limit)
        .await?;
    Ok(Json(LogsResponse { job_id, logs }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bench/start", post(start))
        .route("/bench/status/{id}", get(status))
        .route("/bench/history", get(history))
        .route("/bench/logs/{id}", get(logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> serde_json::Value {
        json!({"mode": "http", "url": "https://example.com", "concurrency": 10, "duration": 30})
    }

    #[test]
    fn test_defaults_filled_in() {
        let params = BenchParams::from_payload(valid()).unwrap();
        assert_eq!(params.targets, vec![10, 50, 100, 1000]);
        assert_eq!(params.baseline_os_mem_bytes, 512 * 1024 * 1024);
        assert_eq!(params.runs_per_day, 24);
    }

    #[test]
    fn test_missing_field_named() {
        let mut body = valid();
        body.as_object_mut().unwrap().remove("url");
        assert_eq!(BenchParams::from_payload(body).unwrap_err(), "url is required");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut body = valid();
        body["mode"] = json!("carrier-pigeon");
        assert!(BenchParams::from_payload(body).unwrap_err().starts_with("mode"));

        let mut body = valid();
        body["concurrency"] = json!(0);
        assert!(BenchParams::from_payload(body).is_err());

        let mut body = valid();
        body["url"] = json!("ftp://example.com");
        assert!(BenchParams::from_payload(body).is_err());

        let mut body = valid();
        body["duration"] = json!("thirty");
        assert!(BenchParams::from_payload(body)
            .unwrap_err()
            .starts_with("invalid parameters"));

        assert!(BenchParams::from_payload(json!([1, 2])).is_err());
    }
}
