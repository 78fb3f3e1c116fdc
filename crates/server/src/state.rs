// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use benchstream_core::{DurableStore, JobQueue};

use crate::live::FanoutHub;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Live job state: start, status, ephemeral log.
    pub queue: JobQueue,
    /// History: reconciled jobs and logs.
    pub durable: Arc<dyn DurableStore>,
    /// Live log subscribers.
    pub hub: FanoutHub,
}

impl AppState {
    pub fn new(queue: JobQueue, durable: Arc<dyn DurableStore>, hub: FanoutHub) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            queue,
            durable,
            hub,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
