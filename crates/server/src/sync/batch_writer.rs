// crates/server/src/sync/batch_writer.rs
//! Size-or-time batched writer in front of a durable sink.
//!
//! Callers `submit` records without waiting on I/O. A background task owns
//! the buffer and hands the whole of it to the sink when it reaches
//! `max_batch` records or when `flush_interval` has passed since the last
//! flush, whichever comes first. The buffer is only cleared once the sink
//! call has returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use benchstream_core::{StoreError, StoreResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::metrics;

/// Destination for flushed batches. One call per flush.
#[async_trait]
pub trait BatchSink<T>: Send + Sync + 'static {
    /// Persist `batch`, returning how many records were newly written.
    async fn write_batch(&self, batch: &[T]) -> StoreResult<u64>;
}

pub use benchstream_core::FailurePolicy;

/// Under `FailurePolicy::Retain` the buffer is capped at
/// `RETAIN_FACTOR * max_batch`; the oldest records go first.
const RETAIN_FACTOR: usize = 8;

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub max_batch: usize,
    pub flush_interval: Duration,
    pub on_failure: FailurePolicy,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            max_batch: 500,
            flush_interval: Duration::from_secs(2),
            on_failure: FailurePolicy::Drop,
        }
    }
}

impl BatchWriterConfig {
    pub fn from_config(config: &benchstream_core::Config) -> Self {
        Self {
            max_batch: config.writer_batch_size,
            flush_interval: config.writer_flush_interval,
            on_failure: config.writer_on_failure,
        }
    }
}

/// Counters shared between the handle and the task.
#[derive(Debug, Default)]
struct Counters {
    flushes: AtomicU64,
    records_written: AtomicU64,
    failed_flushes: AtomicU64,
    dropped_records: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Sink calls made, successful or not.
    pub flushes: u64,
    pub records_written: u64,
    pub failed_flushes: u64,
    pub dropped_records: u64,
}

enum Command<T> {
    Record(T),
    Flush(oneshot::Sender<StoreResult<u64>>),
    Close(oneshot::Sender<StoreResult<u64>>),
}

/// Cloneable handle to a running writer task.
pub struct BatchWriter<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    counters: Arc<Counters>,
}

impl<T> Clone for BatchWriter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T: Send + 'static> BatchWriter<T> {
    /// Start the writer task. It runs until `close` is called or every
    /// handle has been dropped; either way the remaining buffer is flushed.
    pub fn spawn(sink: Arc<dyn BatchSink<T>>, config: BatchWriterConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let task = WriterTask {
            sink,
            max_batch: config.max_batch.max(1),
            flush_interval: config.flush_interval,
            on_failure: config.on_failure,
            buffer: Vec::new(),
            deadline: Instant::now() + config.flush_interval,
            size_trigger_held: false,
            counters: counters.clone(),
        };
        let handle = tokio::spawn(task.run(rx));
        (Self { tx, counters }, handle)
    }

    /// Queue a record. Never waits on the sink.
    pub fn submit(&self, record: T) {
        if self.tx.send(Command::Record(record)).is_err() {
            self.counters.dropped_records.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Batch writer closed, record dropped");
        }
    }

    /// Flush everything submitted so far and return the sink result.
    pub async fn flush(&self) -> StoreResult<u64> {
        self.request(Command::Flush).await
    }

    /// Flush the remainder and stop the task.
    pub async fn close(&self) -> StoreResult<u64> {
        self.request(Command::Close).await
    }

    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<StoreResult<u64>>) -> Command<T>,
    ) -> StoreResult<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| StoreError::Unavailable("batch writer closed".into()))?;
        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("batch writer stopped".into()))?
    }
}

struct WriterTask<T> {
    sink: Arc<dyn BatchSink<T>>,
    max_batch: usize,
    flush_interval: Duration,
    on_failure: FailurePolicy,
    buffer: Vec<T>,
    deadline: Instant,
    /// Set after a retained failure so every new record does not retry the
    /// sink; cleared on the next flush attempt.
    size_trigger_held: bool,
    counters: Arc<Counters>,
}

impl<T: Send + 'static> WriterTask<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<T>>) {
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Record(record)) => {
                        self.buffer.push(record);
                        if self.buffer.len() >= self.max_batch && !self.size_trigger_held {
                            let _ = self.flush("size").await;
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        let result = self.flush("explicit").await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Close(reply)) => {
                        let result = self.flush("close").await;
                        let _ = reply.send(result);
                        break;
                    }
                    None => {
                        let _ = self.flush("close").await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(self.deadline) => {
                    let _ = self.flush("interval").await;
                }
            }
        }
        tracing::debug!(stats = ?self.counters.snapshot(), "Batch writer stopped");
    }

    async fn flush(&mut self, trigger: &'static str) -> StoreResult<u64> {
        self.deadline = Instant::now() + self.flush_interval;
        self.size_trigger_held = false;
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let started = std::time::Instant::now();
        let count = self.buffer.len();
        let result = self.sink.write_batch(&self.buffer).await;
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        metrics::record_flush(trigger, count, started.elapsed(), result.is_ok());

        match &result {
            Ok(written) => {
                self.counters
                    .records_written
                    .fetch_add(*written, Ordering::Relaxed);
                self.buffer.clear();
                tracing::debug!(trigger, records = count, written, "Flushed batch");
            }
            Err(e) => {
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                match self.on_failure {
                    FailurePolicy::Drop => {
                        self.counters
                            .dropped_records
                            .fetch_add(count as u64, Ordering::Relaxed);
                        self.buffer.clear();
                        tracing::warn!(trigger, records = count, error = %e, "Batch flush failed, batch dropped");
                    }
                    FailurePolicy::Retain => {
                        let cap = self.max_batch.saturating_mul(RETAIN_FACTOR);
                        if self.buffer.len() > cap {
                            let excess = self.buffer.len() - cap;
                            self.buffer.drain(..excess);
                            self.counters
                                .dropped_records
                                .fetch_add(excess as u64, Ordering::Relaxed);
                        }
                        self.size_trigger_held = true;
                        tracing::warn!(
                            trigger,
                            records = count,
                            retained = self.buffer.len(),
                            error = %e,
                            "Batch flush failed, batch kept for retry"
                        );
                    }
                }
            }
        }
        result
    }
}
