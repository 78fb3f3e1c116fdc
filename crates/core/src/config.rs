// crates/core/src/config.rs
//! Runtime configuration, read once from the environment at startup.
//!
//! Every knob has a default; a malformed value logs a warning and falls back
//! to that default rather than refusing to start.

use std::path::PathBuf;
use std::time::Duration;

/// When the reconciler may move a job's watermark past lines it has read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatermarkPolicy {
    /// Advance as soon as the lines are handed to the batched writer,
    /// whatever the outcome of the durable write.
    #[default]
    AfterHandoff,
    /// Force a flush and advance only if it succeeds. A failed write leaves
    /// the watermark in place so the range is re-read next cycle.
    AfterCommit,
}

/// What the batched writer does with a batch the durable store rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Discard the batch after logging it.
    #[default]
    Drop,
    /// Keep the records and retry them with the next timer flush.
    Retain,
}

impl FailurePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Some(Self::Drop),
            "retain" => Some(Self::Retain),
            _ => None,
        }
    }
}

impl WatermarkPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after-handoff" | "handoff" => Some(Self::AfterHandoff),
            "after-commit" | "commit" => Some(Self::AfterCommit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Reconciler tick (`DB_SYNC_INTERVAL`, seconds).
    pub sync_interval: Duration,
    /// Max log lines read per job per cycle (`DB_LOG_BATCH_LIMIT`).
    pub log_batch_limit: u64,
    /// Batched writer size trigger (`DB_WRITER_BATCH_SIZE`).
    pub writer_batch_size: usize,
    /// Batched writer time trigger (`DB_WRITER_FLUSH_INTERVAL`, seconds).
    pub writer_flush_interval: Duration,
    /// Upper bound on any single store call (`DB_STORE_TIMEOUT`, seconds).
    pub store_timeout: Duration,
    pub watermark_policy: WatermarkPolicy,
    /// Batched writer behaviour on a failed flush (`DB_WRITER_ON_FAILURE`).
    pub writer_on_failure: FailurePolicy,
    /// Ephemeral log list cap per job (`JOB_LOG_RETAIN`).
    pub log_retain: u64,
    /// Per-subscriber live mailbox (`FANOUT_MAILBOX`).
    pub fanout_mailbox: usize,
    /// `BENCHSTREAM_DB_PATH`; `None` means the default cache location.
    pub db_path: Option<PathBuf>,
    pub port: u16,
}

pub const DEFAULT_PORT: u16 = 47900;

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(1),
            log_batch_limit: 1000,
            writer_batch_size: 500,
            writer_flush_interval: Duration::from_secs(2),
            store_timeout: Duration::from_secs(5),
            watermark_policy: WatermarkPolicy::AfterHandoff,
            writer_on_failure: FailurePolicy::Drop,
            log_retain: 2000,
            fanout_mailbox: 256,
            db_path: None,
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            sync_interval: seconds(&lookup, "DB_SYNC_INTERVAL", d.sync_interval),
            log_batch_limit: positive(&lookup, "DB_LOG_BATCH_LIMIT", d.log_batch_limit),
            writer_batch_size: positive(&lookup, "DB_WRITER_BATCH_SIZE", d.writer_batch_size as u64)
                as usize,
            writer_flush_interval: seconds(
                &lookup,
                "DB_WRITER_FLUSH_INTERVAL",
                d.writer_flush_interval,
            ),
            store_timeout: seconds(&lookup, "DB_STORE_TIMEOUT", d.store_timeout),
            watermark_policy: match lookup("DB_WATERMARK_POLICY") {
                None => d.watermark_policy,
                Some(raw) => WatermarkPolicy::parse(&raw).unwrap_or_else(|| {
                    tracing::warn!(value = %raw, "Invalid DB_WATERMARK_POLICY, using after-handoff");
                    d.watermark_policy
                }),
            },
            writer_on_failure: match lookup("DB_WRITER_ON_FAILURE") {
                None => d.writer_on_failure,
                Some(raw) => FailurePolicy::parse(&raw).unwrap_or_else(|| {
                    tracing::warn!(value = %raw, "Invalid DB_WRITER_ON_FAILURE, using drop");
                    d.writer_on_failure
                }),
            },
            log_retain: positive(&lookup, "JOB_LOG_RETAIN", d.log_retain),
            fanout_mailbox: positive(&lookup, "FANOUT_MAILBOX", d.fanout_mailbox as u64) as usize,
            db_path: lookup("BENCHSTREAM_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            port: lookup("BENCHSTREAM_PORT")
                .or_else(|| lookup("PORT"))
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(d.port),
        }
    }
}

/// Shortest accepted interval; anything below it would spin or panic timers.
const MIN_DURATION: Duration = Duration::from_millis(1);

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let Some(raw) = lookup(key) else {
        return default;
    };
    let parsed = raw
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    match parsed {
        Some(d) if d >= MIN_DURATION => d,
        _ => {
            tracing::warn!(key, value = %raw, default_secs = default.as_secs_f64(), "Invalid duration, using default");
            default
        }
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => n,
        _ => {
            tracing::warn!(key, value = %raw, default, "Invalid count, using default");
            default
        }
    }
}

/// App cache root: `~/.cache/benchstream/` on Linux.
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("benchstream"))
}

/// SQLite database file: `<app_cache_dir>/benchstream.db`.
pub fn default_db_path() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("benchstream.db"))
}
