// crates/db/src/migrations.rs
//! Schema for the durable job history, applied in order by
//! `Database::migrate`. Append new entries; never edit applied ones.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table, one row per job. params is a JSON string.
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT,
    created_at INTEGER,
    started_at INTEGER,
    finished_at INTEGER,
    exit_code INTEGER,
    result_path TEXT,
    error TEXT,
    params TEXT,
    last_updated INTEGER NOT NULL
);
"#,
    // Migration 2: per-line logs; (job_id, seq) is the dedup key.
    r#"
CREATE TABLE IF NOT EXISTS job_logs (
    job_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    ts INTEGER NOT NULL,
    line TEXT NOT NULL,
    PRIMARY KEY (job_id, seq)
);
"#,
    // Migration 3: history listing
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC);
"#,
];
