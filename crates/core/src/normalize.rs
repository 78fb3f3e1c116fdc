// crates/core/src/normalize.rs
//! Lenient conversion of a raw job hash into a `JobRecord`.
//!
//! Hash fields are untyped strings written by producers and workers we do
//! not control. Nothing here fails: an absent, empty or unparseable field
//! becomes `None` and the record is still usable.

use std::collections::HashMap;

use benchstream_types::{JobRecord, JobStatus};

pub fn normalize_job(job_id: &str, fields: &HashMap<String, String>) -> JobRecord {
    let mut record = JobRecord::new(job_id);

    record.status = non_empty(fields, "status").and_then(|raw| {
        let parsed = JobStatus::parse(raw);
        if parsed.is_none() {
            tracing::debug!(job_id, status = raw, "Unknown job status, storing null");
        }
        parsed
    });
    record.created_at = int_field(job_id, fields, "created_at");
    record.started_at = int_field(job_id, fields, "started_at");
    record.finished_at = int_field(job_id, fields, "finished_at");
    record.exit_code = int_field(job_id, fields, "exit_code");
    record.result_path = non_empty(fields, "result_path").map(str::to_string);
    record.error = non_empty(fields, "error").map(str::to_string);
    record.params = non_empty(fields, "params").map(|raw| {
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
    });

    record
}

fn non_empty<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn int_field(job_id: &str, fields: &HashMap<String, String>, name: &str) -> Option<i64> {
    let raw = non_empty(fields, name)?;
    // "12" and "12.0" both occur in worker output.
    let parsed = raw
        .parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64));
    if parsed.is_none() {
        tracing::debug!(job_id, field = name, value = raw, "Malformed integer field, storing null");
    }
    parsed
}
