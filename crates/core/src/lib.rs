// crates/core/src/lib.rs
//! Job state contract and store capabilities for benchstream.

pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod normalize;
pub mod queue;
pub mod store;

pub use config::{Config, FailurePolicy, WatermarkPolicy};
pub use error::*;
pub use memory::MemoryStore;
pub use normalize::normalize_job;
pub use queue::{now_ts, JobQueue};
pub use store::{bounded, DurableStore, EphemeralStore, MessageStream};
