// crates/types/src/lib.rs
//! Data types shared by the benchstream crates.
//!
//! Everything here is plain serde data: job metadata as it is mirrored into
//! durable storage, log rows keyed by `(job_id, seq)`, and the payload that
//! travels over the live log channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job identifier (a UUID string, stable for the job's lifetime).
pub type JobId = String;

/// Lifecycle of a load-test job.
///
/// Transitions are monotonic: `queued → running → {completed | failed}`.
/// A job may also fail straight out of `queued` (e.g. the worker could not
/// launch the load tool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse the wire form. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Re-asserting the current status is allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (JobStatus::Queued, _) => true,
            (JobStatus::Running, JobStatus::Completed | JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized job metadata, one row per job in the durable `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: Option<JobStatus>,
    pub created_at: Option<i64>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub result_path: Option<String>,
    pub error: Option<String>,
    /// Opaque job parameters. Stored as a JSON string; a value that was not
    /// valid JSON at the source is kept as a JSON string.
    pub params: Option<serde_json::Value>,
    /// Unix seconds of the last durable upsert. `None` until persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

impl JobRecord {
    /// An empty record for `id` with every optional field unset.
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            status: None,
            created_at: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
            result_path: None,
            error: None,
            params: None,
            last_updated: None,
        }
    }
}

/// A persisted log line for a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    pub seq: u64,
    pub ts: i64,
    pub line: String,
}

/// A log line tagged with its job, as handed to the batched writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub job_id: JobId,
    pub seq: u64,
    pub ts: i64,
    pub line: String,
}

impl LogRecord {
    /// The stored form, without the job id.
    pub fn to_row(&self) -> LogRow {
        LogRow {
            seq: self.seq,
            ts: self.ts,
            line: self.line.clone(),
        }
    }
}

/// Payload published on the live log channel: `{"job_id": ..., "line": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub job_id: JobId,
    pub line: String,
}

#[derive(Deserialize)]
struct RawLogEvent {
    job_id: Option<String>,
    line: Option<String>,
}

impl LogEvent {
    pub fn new(job_id: impl Into<JobId>, line: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            line: line.into(),
        }
    }

    /// Decode a channel payload. Returns `None` when the payload is not JSON,
    /// lacks `line`, or lacks a non-empty `job_id`. An empty `line` is valid.
    pub fn parse(payload: &str) -> Option<Self> {
        let raw: RawLogEvent = serde_json::from_str(payload).ok()?;
        match (raw.job_id, raw.line) {
            (Some(job_id), Some(line)) if !job_id.is_empty() => Some(Self { job_id, line }),
            _ => None,
        }
    }

    pub fn to_json(&self) -> String {
        // Two string fields: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// An entry popped off the work queue by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Live view of a job straight from the ephemeral store, including the
/// currently retained log lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub record: JobRecord,
    pub log: Vec<String>,
}
