// crates/server/src/live/hub.rs
//! Registry of live log subscribers grouped by job.
//!
//! Each subscriber owns a bounded mailbox. Delivery never waits: a full
//! mailbox loses that one message, a closed one is pruned. Dropping the
//! `LogSubscription` removes the subscriber from its group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use benchstream_types::{JobId, LogEvent};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

type SubscriberId = u64;

struct HubInner {
    groups: DashMap<JobId, HashMap<SubscriberId, mpsc::Sender<LogEvent>>>,
    next_id: AtomicU64,
    mailbox: usize,
}

#[derive(Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
}

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Subscribers whose mailbox was full.
    pub dropped: usize,
    /// Subscribers removed because their receiver was gone.
    pub pruned: usize,
}

impl FanoutHub {
    pub fn new(mailbox: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                groups: DashMap::new(),
                next_id: AtomicU64::new(1),
                mailbox: mailbox.max(1),
            }),
        }
    }

    /// Subscribe to one job's lines.
    pub fn join(&self, job_id: &str) -> LogSubscription {
        let (tx, rx) = mpsc::channel(self.inner.mailbox);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .groups
            .entry(job_id.to_string())
            .or_default()
            .insert(id, tx);
        tracing::debug!(job_id, subscriber = id, "Subscriber joined");
        LogSubscription {
            id,
            job_id: job_id.to_string(),
            rx,
            hub: self.clone(),
        }
    }

    pub fn deliver(&self, event: &LogEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        if let Some(group) = self.inner.groups.get(&event.job_id) {
            for (id, tx) in group.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => report.dropped += 1,
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            self.leave(&event.job_id, id);
            report.pruned += 1;
        }
        if report.dropped > 0 {
            tracing::debug!(job_id = %event.job_id, dropped = report.dropped, "Mailbox full, line dropped");
        }
        report
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.inner.groups.get(job_id).map_or(0, |g| g.len())
    }

    pub fn group_count(&self) -> usize {
        self.inner.groups.len()
    }

    fn leave(&self, job_id: &str, id: SubscriberId) {
        let now_empty = match self.inner.groups.get_mut(job_id) {
            Some(mut group) => {
                group.remove(&id);
                group.is_empty()
            }
            None => false,
        };
        // the shard guard is released above
        if now_empty {
            self.inner.groups.remove_if(job_id, |_, group| group.is_empty());
        }
        tracing::debug!(job_id, subscriber = id, "Subscriber left");
    }
}

/// A live feed of one job's lines. Leaves the group when dropped.
pub struct LogSubscription {
    id: SubscriberId,
    job_id: JobId,
    rx: mpsc::Receiver<LogEvent>,
    hub: FanoutHub,
}

impl LogSubscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.hub.leave(&self.job_id, self.id);
    }
}
