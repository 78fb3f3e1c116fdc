// crates/server/src/sync/sink.rs
//! Batched-writer sink that lands log records in the durable store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use benchstream_core::{bounded, DurableStore, StoreResult};
use benchstream_types::LogRecord;

use super::batch_writer::BatchSink;

pub struct DurableLogSink {
    store: Arc<dyn DurableStore>,
    op_timeout: Duration,
}

impl DurableLogSink {
    pub fn new(store: Arc<dyn DurableStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }
}

#[async_trait]
impl BatchSink<LogRecord> for DurableLogSink {
    async fn write_batch(&self, batch: &[LogRecord]) -> StoreResult<u64> {
        bounded(
            "insert_log_records",
            self.op_timeout,
            self.store.insert_log_records(batch),
        )
        .await
    }
}
