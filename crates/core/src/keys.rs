// crates/core/src/keys.rs
//! Key layout in the ephemeral store.
//!
//! | key                          | type   | written by        |
//! |------------------------------|--------|-------------------|
//! | `bench_jobs`                 | list   | producer (queue)  |
//! | `bench_job:<id>`             | hash   | producer, worker  |
//! | `bench_job_log:<id>`         | list   | worker            |
//! | `bench_job_log_base:<id>`    | string | worker (on trim)  |
//! | `bench_job_log_sync:<id>`    | string | reconciler        |
//! | `bench_logs`                 | pubsub | worker            |

pub const JOB_QUEUE_KEY: &str = "bench_jobs";
pub const JOB_HASH_PREFIX: &str = "bench_job:";
pub const JOB_LOG_PREFIX: &str = "bench_job_log:";
pub const JOB_LOG_BASE_PREFIX: &str = "bench_job_log_base:";
pub const JOB_LOG_SYNC_PREFIX: &str = "bench_job_log_sync:";
pub const LOG_CHANNEL: &str = "bench_logs";

pub fn job_key(job_id: &str) -> String {
    format!("{JOB_HASH_PREFIX}{job_id}")
}

pub fn log_key(job_id: &str) -> String {
    format!("{JOB_LOG_PREFIX}{job_id}")
}

/// Number of entries evicted from the head of the job's log list.
pub fn log_base_key(job_id: &str) -> String {
    format!("{JOB_LOG_BASE_PREFIX}{job_id}")
}

/// The reconciler's watermark for the job.
pub fn sync_key(job_id: &str) -> String {
    format!("{JOB_LOG_SYNC_PREFIX}{job_id}")
}

/// Extract the job id from a `bench_job:<id>` key.
pub fn job_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(JOB_HASH_PREFIX).filter(|id| !id.is_empty())
}
