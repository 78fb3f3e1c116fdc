// crates/db/src/queries/mod.rs
// Job and job-log queries for the benchstream SQLite database.

pub mod job_logs;
pub mod jobs;
