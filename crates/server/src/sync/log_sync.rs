// crates/server/src/sync/log_sync.rs
//! Incremental copy of one job's log list into the durable store.
//!
//! Seqs are absolute: entry `i` of the list has seq `base + i`, where `base`
//! counts the entries trimmed off the head. Each call forwards at most
//! `max_batch` entries starting at the job's watermark.

use std::sync::Arc;
use std::time::Duration;

use benchstream_core::{bounded, keys, now_ts, EphemeralStore, StoreResult, WatermarkPolicy};
use benchstream_types::LogRecord;

use super::batch_writer::BatchWriter;
use super::watermark::Watermarks;

/// Result of one `sync_job` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Entries handed to the writer.
    pub read: u64,
    /// Seqs that were trimmed before they could be copied.
    pub lost: u64,
    /// Watermark after the call.
    pub watermark: u64,
    /// The list was trimmed while being read; nothing was forwarded.
    pub abandoned: bool,
}

#[derive(Clone)]
pub struct LogSyncEngine {
    store: Arc<dyn EphemeralStore>,
    writer: BatchWriter<LogRecord>,
    max_batch: u64,
    policy: WatermarkPolicy,
    op_timeout: Duration,
}

impl LogSyncEngine {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        writer: BatchWriter<LogRecord>,
        max_batch: u64,
        policy: WatermarkPolicy,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            writer,
            max_batch: max_batch.max(1),
            policy,
            op_timeout,
        }
    }

    pub fn writer(&self) -> &BatchWriter<LogRecord> {
        &self.writer
    }

    pub async fn sync_job(&self, marks: &mut Watermarks, job_id: &str) -> StoreResult<SyncOutcome> {
        let watermark = marks.load(job_id).await?;
        let log_key = keys::log_key(job_id);

        let base = self.read_base(job_id).await?;
        let len = bounded("list_length", self.op_timeout, self.store.list_length(&log_key)).await?;
        let end = base + len;

        let mut lost = 0;
        let mut from = watermark;
        if watermark < base {
            lost = base - watermark;
            tracing::warn!(
                job_id,
                from = watermark,
                to = base,
                lost,
                "Log lines trimmed before sync, permanently lost"
            );
            from = base;
        }

        if end <= from {
            if lost > 0 {
                self.persist(marks, job_id, from).await;
            }
            return Ok(SyncOutcome {
                read: 0,
                lost,
                watermark: from,
                abandoned: false,
            });
        }

        let count = (end - from).min(self.max_batch);
        let start = from - base;
        let entries = bounded(
            "list_range",
            self.op_timeout,
            self.store.list_range(&log_key, start, start + count - 1),
        )
        .await?;

        // A trim between the bounds read and the range read shifts indices.
        let base_after = self.read_base(job_id).await?;
        if base_after != base {
            tracing::debug!(job_id, base, base_after, "Log list trimmed mid-read, retrying next cycle");
            return Ok(SyncOutcome {
                read: 0,
                lost: 0,
                watermark,
                abandoned: true,
            });
        }

        let read = entries.len() as u64;
        let ts = now_ts();
        for (i, line) in entries.into_iter().enumerate() {
            self.writer.submit(LogRecord {
                job_id: job_id.to_string(),
                seq: from + i as u64,
                ts,
                line,
            });
        }

        if self.policy == WatermarkPolicy::AfterCommit {
            self.writer.flush().await?;
        }
        let next = from + read;
        self.persist(marks, job_id, next).await;

        Ok(SyncOutcome {
            read,
            lost,
            watermark: next,
            abandoned: false,
        })
    }

    async fn read_base(&self, job_id: &str) -> StoreResult<u64> {
        let raw = bounded(
            "get",
            self.op_timeout,
            self.store.get(&keys::log_base_key(job_id)),
        )
        .await?;
        Ok(raw.and_then(|s| s.trim().parse::<u64>().ok()).unwrap_or(0))
    }

    async fn persist(&self, marks: &mut Watermarks, job_id: &str, to: u64) {
        if let Err(e) = marks.advance(job_id, to).await {
            tracing::warn!(job_id, watermark = to, error = %e, "Failed to persist watermark");
        }
    }
}
