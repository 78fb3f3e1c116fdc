// crates/server/src/lib.rs
//! benchstream server library.
//!
//! Wires the ephemeral job store to the durable history: the reconciler and
//! its batched writer, the realtime fan-out, and the Axum HTTP surface.

pub mod error;
pub mod live;
pub mod metrics;
pub mod routes;
pub mod simulate;
pub mod state;
pub mod sync;

pub use crate::error::*;
pub use crate::metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use benchstream_core::{Config, DurableStore, EphemeralStore, JobQueue};
use benchstream_types::LogRecord;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::live::{FanoutHub, FanoutListener};
use crate::sync::{BatchWriter, BatchWriterConfig, DurableLogSink, Reconciler};

/// Create the Axum application with all routes and middleware.
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Background tasks of a running pipeline.
pub struct Pipeline {
    pub state: Arc<AppState>,
    pub writer: BatchWriter<LogRecord>,
    pub reconciler: JoinHandle<()>,
    pub listener: JoinHandle<()>,
    pub writer_task: JoinHandle<()>,
}

impl Pipeline {
    /// Spawn the writer, reconciler and fan-out listener. All of them stop
    /// when `cancel` fires; the reconciler closes the writer on its way out.
    pub fn start(
        config: &Config,
        ephemeral: Arc<dyn EphemeralStore>,
        durable: Arc<dyn DurableStore>,
        cancel: &CancellationToken,
    ) -> Self {
        let sink = Arc::new(DurableLogSink::new(durable.clone(), config.store_timeout));
        let (writer, writer_task) = BatchWriter::spawn(sink, BatchWriterConfig::from_config(config));

        let reconciler = Reconciler::new(ephemeral.clone(), durable.clone(), writer.clone(), config);
        let reconciler = tokio::spawn(reconciler.run(cancel.child_token()));

        let hub = FanoutHub::new(config.fanout_mailbox);
        let listener = FanoutListener::new(ephemeral.clone(), hub.clone(), config.store_timeout);
        let listener = tokio::spawn(listener.run(cancel.child_token()));

        let queue = JobQueue::new(ephemeral, config.log_retain);
        Self {
            state: AppState::new(queue, durable, hub),
            writer,
            reconciler,
            listener,
            writer_task,
        }
    }

    /// Wait for every task to finish after cancellation.
    ///
    /// Drops this handle to the writer first, so the writer task drains and
    /// exits even when the reconciler died without closing it.
    pub async fn join(self) {
        let Pipeline {
            writer,
            reconciler,
            listener,
            writer_task,
            ..
        } = self;
        drop(writer);
        for (name, task) in [
            ("reconciler", reconciler),
            ("listener", listener),
            ("writer", writer_task),
        ] {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    tracing::warn!(task = name, "Background task was aborted");
                }
                Err(e) => tracing::error!(task = name, error = %e, "Background task panicked"),
            }
        }
    }
}
