// crates/server/src/sync/watermark.rs
//! Per-job sync cursors.
//!
//! A watermark is the next seq that has not been handed to the durable side.
//! Values are cached in memory and persisted under `bench_job_log_sync:<id>`
//! so a restarted reconciler resumes close to where it stopped; anything it
//! replays is skipped by the durable store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use benchstream_core::{bounded, keys, EphemeralStore, StoreResult};
use benchstream_types::JobId;

pub struct Watermarks {
    store: Arc<dyn EphemeralStore>,
    cache: HashMap<JobId, u64>,
    op_timeout: Duration,
}

impl Watermarks {
    pub fn new(store: Arc<dyn EphemeralStore>, op_timeout: Duration) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            op_timeout,
        }
    }

    /// Current watermark, reading the persisted value on first use.
    /// Missing or unparsable values count as 0.
    pub async fn load(&mut self, job_id: &str) -> StoreResult<u64> {
        if let Some(mark) = self.cache.get(job_id) {
            return Ok(*mark);
        }
        let raw = bounded(
            "get",
            self.op_timeout,
            self.store.get(&keys::sync_key(job_id)),
        )
        .await?;
        let mark = match raw.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(s) => s.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!(job_id, value = s, "Unparsable watermark, starting from 0");
                0
            }),
        };
        self.cache.insert(job_id.to_string(), mark);
        Ok(mark)
    }

    /// Move the watermark forward to `to`. Never moves it back. The in-memory
    /// value is advanced even if persisting it fails.
    pub async fn advance(&mut self, job_id: &str, to: u64) -> StoreResult<u64> {
        let current = self.cache.get(job_id).copied().unwrap_or(0);
        if to <= current && self.cache.contains_key(job_id) {
            return Ok(current);
        }
        self.cache.insert(job_id.to_string(), to);
        bounded(
            "set",
            self.op_timeout,
            self.store.set(&keys::sync_key(job_id), &to.to_string()),
        )
        .await?;
        Ok(to)
    }

    pub fn cached(&self, job_id: &str) -> Option<u64> {
        self.cache.get(job_id).copied()
    }
}
