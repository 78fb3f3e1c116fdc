// crates/server/src/sync/reconciler.rs
//! Periodic copy of ephemeral job state into the durable store.
//!
//! Every tick enumerates `bench_job:*`, upserts each job's normalized
//! metadata and forwards its new log lines. A failing job is logged and
//! skipped; a failing enumeration aborts the cycle. The next tick retries
//! either way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use benchstream_core::{
    bounded, keys, normalize_job, Config, DurableStore, EphemeralStore, StoreResult,
};
use benchstream_types::LogRecord;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::batch_writer::BatchWriter;
use super::log_sync::LogSyncEngine;
use super::watermark::Watermarks;
use crate::metrics;

/// Counts for one reconcile cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub jobs_seen: u64,
    pub jobs_upserted: u64,
    pub jobs_failed: u64,
    pub lines_forwarded: u64,
    pub lines_lost: u64,
}

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct Reconciler {
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
    log_sync: LogSyncEngine,
    watermarks: Watermarks,
    interval: Duration,
    op_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        ephemeral: Arc<dyn EphemeralStore>,
        durable: Arc<dyn DurableStore>,
        writer: BatchWriter<LogRecord>,
        config: &Config,
    ) -> Self {
        let log_sync = LogSyncEngine::new(
            ephemeral.clone(),
            writer,
            config.log_batch_limit,
            config.watermark_policy,
            config.store_timeout,
        );
        Self {
            watermarks: Watermarks::new(ephemeral.clone(), config.store_timeout),
            ephemeral,
            durable,
            log_sync,
            interval: config.sync_interval.max(MIN_INTERVAL),
            op_timeout: config.store_timeout,
        }
    }

    pub fn log_sync(&self) -> &LogSyncEngine {
        &self.log_sync
    }

    /// One pass over every job currently in the ephemeral store.
    pub async fn run_cycle(&mut self) -> StoreResult<CycleReport> {
        let job_keys = bounded(
            "keys",
            self.op_timeout,
            self.ephemeral.keys(keys::JOB_HASH_PREFIX),
        )
        .await?;

        let mut report = CycleReport::default();
        for key in &job_keys {
            let Some(job_id) = keys::job_id_from_key(key) else {
                continue;
            };
            report.jobs_seen += 1;

            let fields = match bounded("get_hash", self.op_timeout, self.ephemeral.get_hash(key)).await {
                // gone between enumeration and read
                Ok(fields) if fields.is_empty() => continue,
                Ok(fields) => fields,
                Err(e) => {
                    report.jobs_failed += 1;
                    tracing::warn!(job_id, error = %e, "Failed to read job metadata");
                    continue;
                }
            };

            let record = normalize_job(job_id, &fields);
            if let Err(e) = bounded("upsert_job", self.op_timeout, self.durable.upsert_job(&record)).await {
                report.jobs_failed += 1;
                tracing::warn!(job_id, error = %e, "Failed to upsert job");
                continue;
            }
            report.jobs_upserted += 1;

            match self.log_sync.sync_job(&mut self.watermarks, job_id).await {
                Ok(outcome) => {
                    report.lines_forwarded += outcome.read;
                    report.lines_lost += outcome.lost;
                }
                Err(e) => {
                    report.jobs_failed += 1;
                    tracing::warn!(job_id, error = %e, "Failed to sync job logs");
                }
            }
        }
        Ok(report)
    }

    /// Tick until `cancel` fires, then close the writer. A cycle in
    /// progress when the token fires is allowed to finish.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs_f64(), "Reconciler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.run_cycle().await {
                        Ok(report) => {
                            metrics::record_cycle(&report, started.elapsed());
                            tracing::debug!(
                                jobs_seen = report.jobs_seen,
                                jobs_upserted = report.jobs_upserted,
                                jobs_failed = report.jobs_failed,
                                lines_forwarded = report.lines_forwarded,
                                lines_lost = report.lines_lost,
                                duration_ms = started.elapsed().as_millis() as u64,
                                "Reconcile cycle complete"
                            );
                        }
                        Err(e) => {
                            metrics::record_cycle_failure();
                            tracing::warn!(error = %e, "Reconcile cycle aborted, retrying next tick");
                        }
                    }
                }
            }
        }

        match self.log_sync.writer().close().await {
            Ok(written) => tracing::info!(final_flush = written, "Reconciler stopped"),
            Err(e) => tracing::warn!(error = %e, "Reconciler stopped, final flush failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::batch_writer::{BatchWriterConfig, FailurePolicy};
    use crate::sync::sink::DurableLogSink;
    use benchstream_core::{JobQueue, MemoryStore};
    use benchstream_db::Database;
    use benchstream_types::JobStatus;
    use pretty_assertions::assert_eq;

    struct Harness {
        store: MemoryStore,
        queue: JobQueue,
        durable: Arc<Database>,
        reconciler: Reconciler,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        let ephemeral: Arc<dyn EphemeralStore> = Arc::new(store.clone());
        let durable = Arc::new(Database::new_in_memory().await.unwrap());
        let config = Config {
            log_batch_limit: 3,
            ..Config::default()
        };
        let (writer, _task) = BatchWriter::spawn(
            Arc::new(DurableLogSink::new(durable.clone(), config.store_timeout)),
            BatchWriterConfig {
                max_batch: 1000,
                flush_interval: Duration::from_secs(3600),
                on_failure: FailurePolicy::Drop,
            },
        );
        let reconciler = Reconciler::new(ephemeral.clone(), durable.clone(), writer, &config);
        Harness {
            queue: JobQueue::new(ephemeral, config.log_retain),
            store,
            durable,
            reconciler,
        }
    }

    #[tokio::test]
    async fn test_run_survives_zero_interval() {
        let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new());
        let durable = Arc::new(Database::new_in_memory().await.unwrap());
        let config = Config {
            sync_interval: Duration::ZERO,
            ..Config::default()
        };
        let (writer, writer_task) = BatchWriter::spawn(
            Arc::new(DurableLogSink::new(durable.clone(), config.store_timeout)),
            BatchWriterConfig::from_config(&config),
        );
        let reconciler = Reconciler::new(ephemeral, durable, writer, &config);

        let cancel = CancellationToken::new();
        let run = tokio::spawn(reconciler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!run.is_finished());

        cancel.cancel();
        run.await.unwrap();
        writer_task.await.unwrap();
    }

    async fn flush(h: &Harness) {
        h.reconciler.log_sync().writer().flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_cycle_copies_metadata_and_logs() {
        let mut h = harness().await;
        let job_id = h.queue.start_job(serde_json::json!({"mode": "http"})).await.unwrap();
        for i in 0..5 {
            h.queue.append_log(&job_id, &format!("req {i}")).await;
        }

        let first = h.reconciler.run_cycle().await.unwrap();
        assert_eq!(first.jobs_seen, 1);
        assert_eq!(first.jobs_upserted, 1);
        assert_eq!(first.lines_forwarded, 3);

        let second = h.reconciler.run_cycle().await.unwrap();
        assert_eq!(second.lines_forwarded, 2);
        flush(&h).await;

        let stored = h.durable.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, Some(JobStatus::Queued));
        assert_eq!(stored.params.unwrap()["mode"], "http");
        assert_eq!(h.durable.query_logs(&job_id, 0, 100).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_status_change_replaces_row() {
        let mut h = harness().await;
        let job_id = h.queue.start_job(serde_json::json!({})).await.unwrap();
        h.reconciler.run_cycle().await.unwrap();

        h.queue.mark_running(&job_id).await.unwrap();
        h.queue.complete(&job_id, 0, Some("/tmp/result.json")).await.unwrap();
        h.reconciler.run_cycle().await.unwrap();

        let jobs = h.durable.query_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, Some(JobStatus::Completed));
        assert_eq!(jobs[0].exit_code, Some(0));
        assert!(jobs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_malformed_fields_still_upserted() {
        let mut h = harness().await;
        h.store
            .set_hash(
                &keys::job_key("raw"),
                &[
                    ("status", "running".to_string()),
                    ("created_at", "yesterday".to_string()),
                    ("exit_code", String::new()),
                    ("params", "{not json".to_string()),
                ],
            )
            .await
            .unwrap();

        let report = h.reconciler.run_cycle().await.unwrap();
        assert_eq!(report.jobs_failed, 0);

        let stored = h.durable.get_job("raw").await.unwrap().unwrap();
        assert_eq!(stored.status, Some(JobStatus::Running));
        assert_eq!(stored.created_at, None);
        assert_eq!(stored.exit_code, None);
        assert_eq!(stored.params, Some(serde_json::Value::String("{not json".into())));
    }

    #[tokio::test]
    async fn test_one_bad_job_does_not_stop_the_cycle() {
        let mut h = harness().await;
        let good = h.queue.start_job(serde_json::json!({})).await.unwrap();
        h.queue.append_log(&good, "hello").await;
        // a job hash whose log key holds the wrong type
        h.store
            .set_hash(&keys::job_key("bad"), &[("status", "queued".to_string())])
            .await
            .unwrap();
        h.store.set(&keys::log_key("bad"), "not a list").await.unwrap();

        let report = h.reconciler.run_cycle().await.unwrap();
        assert_eq!(report.jobs_seen, 2);
        assert_eq!(report.jobs_failed, 1);
        assert_eq!(report.lines_forwarded, 1);
        flush(&h).await;
        assert_eq!(h.durable.query_logs(&good, 0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enumeration_failure_aborts_cycle() {
        let mut h = harness().await;
        h.queue.start_job(serde_json::json!({})).await.unwrap();
        h.store.set_offline(true);
        assert!(h.reconciler.run_cycle().await.is_err());

        h.store.set_offline(false);
        assert_eq!(h.reconciler.run_cycle().await.unwrap().jobs_upserted, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_flushes() {
        let h = harness().await;
        let job_id = h.queue.start_job(serde_json::json!({})).await.unwrap();
        h.queue.append_log(&job_id, "only line").await;

        let cancel = CancellationToken::new();
        let durable = h.durable.clone();
        let task = tokio::spawn(h.reconciler.run(cancel.clone()));

        // the first tick fires immediately
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        task.await.unwrap();

        // the final flush on shutdown landed the line
        assert_eq!(durable.query_logs(&job_id, 0, 10).await.unwrap().len(), 1);
    }
}
