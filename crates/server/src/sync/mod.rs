// crates/server/src/sync/mod.rs
//! Ephemeral-to-durable sync pipeline: reconciler, log sync engine and the
//! batched writer they feed.

pub mod batch_writer;
pub mod log_sync;
pub mod reconciler;
pub mod sink;
pub mod watermark;

pub use batch_writer::{BatchSink, BatchWriter, BatchWriterConfig, FailurePolicy, WriterStats};
pub use log_sync::{LogSyncEngine, SyncOutcome};
pub use reconciler::{CycleReport, Reconciler};
pub use sink::DurableLogSink;
pub use watermark::Watermarks;
