// crates/server/src/live/listener.rs
//! Process-wide subscription to the log channel, feeding the fan-out hub.

use std::sync::Arc;
use std::time::Duration;

use benchstream_core::{bounded, keys, EphemeralStore};
use benchstream_types::LogEvent;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::hub::{DeliveryReport, FanoutHub};
use crate::metrics;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct FanoutListener {
    store: Arc<dyn EphemeralStore>,
    hub: FanoutHub,
    channel: String,
    op_timeout: Duration,
}

impl FanoutListener {
    pub fn new(store: Arc<dyn EphemeralStore>, hub: FanoutHub, op_timeout: Duration) -> Self {
        Self {
            store,
            hub,
            channel: keys::LOG_CHANNEL.to_string(),
            op_timeout,
        }
    }

    /// Receive until cancelled, resubscribing with capped exponential
    /// backoff whenever the subscription fails or its stream ends.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;
        'outer: loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                res = bounded("subscribe", self.op_timeout, self.store.subscribe(&self.channel)) => res,
            };

            match subscribed {
                Ok(mut stream) => {
                    tracing::info!(channel = %self.channel, "Fan-out listener subscribed");
                    backoff = INITIAL_BACKOFF;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break 'outer,
                            msg = stream.next() => match msg {
                                Some(payload) => {
                                    self.handle_message(&payload);
                                }
                                None => {
                                    tracing::warn!(channel = %self.channel, "Subscription ended, resubscribing");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %self.channel,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Fan-out subscribe failed"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        tracing::info!(channel = %self.channel, "Fan-out listener stopped");
    }

    /// Route one raw payload. Malformed payloads are dropped.
    pub fn handle_message(&self, payload: &str) -> Option<DeliveryReport> {
        let Some(event) = LogEvent::parse(payload) else {
            tracing::debug!(payload_len = payload.len(), "Dropping malformed log message");
            metrics::record_malformed_message();
            return None;
        };
        let report = self.hub.deliver(&event);
        metrics::record_delivery(&report);
        Some(report)
    }
}
