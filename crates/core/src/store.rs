// crates/core/src/store.rs
//! Capability traits for the two stores the sync pipeline bridges.
//!
//! - `EphemeralStore`: key/hash/list/pub-sub store used for live job
//!   coordination (Redis-shaped). `MemoryStore` is the in-process
//!   implementation.
//! - `DurableStore`: the queryable history store. Implemented by the SQLite
//!   `Database` in `benchstream-db`.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use benchstream_types::{JobRecord, LogRecord, LogRow};

use crate::error::{StoreError, StoreResult};

/// Stream of raw payloads received on a pub/sub channel. Ends when the
/// subscription is dropped by the store.
pub type MessageStream = BoxStream<'static, String>;

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// All fields of a hash. Missing key yields an empty map.
    async fn get_hash(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn set_hash(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()>;

    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Every key starting with `prefix`, in unspecified order.
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn list_length(&self, key: &str) -> StoreResult<u64>;

    /// Entries `start..=end` by position in the list as currently retained.
    /// Out-of-range bounds are clamped.
    async fn list_range(&self, key: &str, start: u64, end: u64) -> StoreResult<Vec<String>>;

    /// Append to the tail. Returns the new length.
    async fn list_append(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Atomically append, trim to `keep_last` and add the number of evicted
    /// entries to the integer at `base_key`. A reader that sees the trimmed
    /// list also sees the larger base. Returns the new retained length.
    async fn list_append_capped(
        &self,
        key: &str,
        base_key: &str,
        value: &str,
        keep_last: u64,
    ) -> StoreResult<u64>;

    async fn list_pop_front(&self, key: &str) -> StoreResult<Option<String>>;

    /// Broadcast `message`. Returns the number of receivers it reached.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream>;
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Full-row replace of the job keyed by `record.id`, atomically.
    async fn upsert_job(&self, record: &JobRecord) -> StoreResult<()>;

    /// Insert rows for one job. Rows whose `(job_id, seq)` already exist are
    /// skipped without failing the batch. Returns the number inserted.
    async fn insert_log_batch(&self, job_id: &str, rows: &[LogRow]) -> StoreResult<u64>;

    /// Insert a batch spanning several jobs in a single transaction, with the
    /// same duplicate-skipping rule as `insert_log_batch`.
    async fn insert_log_records(&self, records: &[LogRecord]) -> StoreResult<u64>;

    /// Most recently created jobs first.
    async fn query_jobs(&self, limit: u32) -> StoreResult<Vec<JobRecord>>;

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<JobRecord>>;

    /// Rows with `seq >= from_seq`, ascending.
    async fn query_logs(&self, job_id: &str, from_seq: u64, limit: u32)
        -> StoreResult<Vec<LogRow>>;
}

/// Run a store call with an upper bound on how long it may block.
pub async fn bounded<T, F>(op: &'static str, after: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { op, after }),
    }
}
