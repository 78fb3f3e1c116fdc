// crates/core/src/queue.rs
//! Producer/worker side of the job contract.
//!
//! A producer calls `start_job`, which writes the job hash and pushes the
//! job onto the work queue. A worker claims jobs, moves them through
//! `running` to a terminal status and appends log lines, each of which is
//! also published on the live channel. The reconciler never goes through
//! this type; it only reads what these calls leave in the store.

use std::sync::Arc;

use benchstream_types::{JobId, JobSnapshot, JobStatus, LogEvent, QueuedJob};

use crate::error::{QueueError, StoreResult};
use crate::keys;
use crate::normalize::normalize_job;
use crate::store::EphemeralStore;

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn EphemeralStore>,
    log_retain: u64,
}

impl JobQueue {
    pub fn new(store: Arc<dyn EphemeralStore>, log_retain: u64) -> Self {
        Self {
            store,
            log_retain: log_retain.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn EphemeralStore> {
        &self.store
    }

    /// Create a job in `queued` state and enqueue it. Returns the new id.
    pub async fn start_job(&self, params: serde_json::Value) -> StoreResult<JobId> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let params_json = params.to_string();
        self.store
            .set_hash(
                &keys::job_key(&job_id),
                &[
                    ("id", job_id.clone()),
                    ("status", JobStatus::Queued.as_str().to_string()),
                    ("created_at", now_ts().to_string()),
                    ("started_at", String::new()),
                    ("finished_at", String::new()),
                    ("exit_code", String::new()),
                    ("result_path", String::new()),
                    ("error", String::new()),
                    ("params", params_json),
                ],
            )
            .await?;

        let item = QueuedJob {
            id: job_id.clone(),
            params,
        };
        let payload = serde_json::to_string(&item).unwrap_or_default();
        self.store.list_append(keys::JOB_QUEUE_KEY, &payload).await?;

        tracing::info!(job_id = %job_id, "Job queued");
        Ok(job_id)
    }

    /// Pop the next queued job. Malformed queue entries are discarded.
    pub async fn claim_next(&self) -> StoreResult<Option<QueuedJob>> {
        loop {
            let Some(payload) = self.store.list_pop_front(keys::JOB_QUEUE_KEY).await? else {
                return Ok(None);
            };
            match serde_json::from_str::<QueuedJob>(&payload) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid job payload in queue, skipping");
                }
            }
        }
    }

    pub async fn mark_running(&self, job_id: &str) -> Result<(), QueueError> {
        self.transition(job_id, JobStatus::Running).await?;
        self.set_field(job_id, "started_at", &now_ts().to_string())
            .await?;
        Ok(())
    }

    /// Record the load tool's exit. Non-zero exit codes fail the job and add
    /// a final log line saying so.
    pub async fn complete(
        &self,
        job_id: &str,
        exit_code: i64,
        result_path: Option<&str>,
    ) -> Result<(), QueueError> {
        let status = if exit_code == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.transition(job_id, status).await?;
        self.set_field(job_id, "exit_code", &exit_code.to_string())
            .await?;
        if exit_code != 0 {
            self.append_log(job_id, &format!("Process exited with code {exit_code}"))
                .await;
        }
        self.set_finished(job_id).await?;
        if let Some(path) = result_path {
            self.set_field(job_id, "result_path", path).await?;
        }
        Ok(())
    }

    pub async fn fail(&self, job_id: &str, error: &str) -> Result<(), QueueError> {
        self.transition(job_id, JobStatus::Failed).await?;
        self.set_field(job_id, "error", error).await?;
        self.set_finished(job_id).await?;
        self.append_log(job_id, &format!("Worker error: {error}")).await;
        Ok(())
    }

    /// Append a log line, trim the list to the retention cap and publish the
    /// line for live observers. Best effort: failures are logged, never
    /// returned, so a flaky store cannot break the worker's output loop.
    pub async fn append_log(&self, job_id: &str, line: &str) {
        if let Err(e) = self.try_append_log(job_id, line).await {
            tracing::warn!(job_id, error = %e, "Failed to append job log line");
        }
    }

    async fn try_append_log(&self, job_id: &str, line: &str) -> StoreResult<()> {
        self.store
            .list_append_capped(
                &keys::log_key(job_id),
                &keys::log_base_key(job_id),
                line,
                self.log_retain,
            )
            .await?;
        let payload = LogEvent::new(job_id, line).to_json();
        self.store.publish(keys::LOG_CHANNEL, &payload).await?;
        Ok(())
    }

    /// Live view of a job, or `None` if the hash does not exist.
    pub async fn get_job(&self, job_id: &str) -> StoreResult<Option<JobSnapshot>> {
        let key = keys::job_key(job_id);
        if !self.store.exists(&key).await? {
            return Ok(None);
        }
        let fields = self.store.get_hash(&key).await?;
        let log_key = keys::log_key(job_id);
        let len = self.store.list_length(&log_key).await?;
        let log = if len == 0 {
            Vec::new()
        } else {
            self.store.list_range(&log_key, 0, len - 1).await?
        };
        Ok(Some(JobSnapshot {
            record: normalize_job(job_id, &fields),
            log,
        }))
    }

    /// Ids of every job hash in the store. Linear in the keyspace.
    pub async fn list_jobs(&self) -> StoreResult<Vec<JobId>> {
        let keys = self.store.keys(keys::JOB_HASH_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|k| keys::job_id_from_key(k))
            .map(str::to_string)
            .collect())
    }

    async fn transition(&self, job_id: &str, next: JobStatus) -> Result<(), QueueError> {
        let key = keys::job_key(job_id);
        let fields = self.store.get_hash(&key).await?;
        if fields.is_empty() {
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        let current = fields
            .get("status")
            .and_then(|s| JobStatus::parse(s))
            .unwrap_or(JobStatus::Queued);
        if !current.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                job_id: job_id.to_string(),
                from: current,
                to: next,
            });
        }
        self.store
            .set_hash_field(&key, "status", next.as_str())
            .await?;
        tracing::debug!(job_id, from = %current, to = %next, "Job status changed");
        Ok(())
    }

    /// `finished_at` is written once and never cleared.
    async fn set_finished(&self, job_id: &str) -> StoreResult<()> {
        let key = keys::job_key(job_id);
        let fields = self.store.get_hash(&key).await?;
        let already = fields
            .get("finished_at")
            .is_some_and(|v| !v.trim().is_empty());
        if !already {
            self.store
                .set_hash_field(&key, "finished_at", &now_ts().to_string())
                .await?;
        }
        Ok(())
    }

    async fn set_field(&self, job_id: &str, field: &str, value: &str) -> StoreResult<()> {
        self.store
            .set_hash_field(&keys::job_key(job_id), field, value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;

    fn queue(retain: u64) -> (MemoryStore, JobQueue) {
        let store = MemoryStore::new();
        let queue = JobQueue::new(Arc::new(store.clone()), retain);
        (store, queue)
    }

    #[tokio::test]
    async fn test_start_and_claim() {
        let (_store, queue) = queue(100);
        let id = queue
            .start_job(serde_json::json!({"url": "http://example.com", "concurrency": 5}))
            .await
            .unwrap();

        let snap = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(snap.record.status, Some(JobStatus::Queued));
        assert!(snap.record.created_at.is_some());
        assert_eq!(snap.record.params.as_ref().unwrap()["concurrency"], 5);
        assert!(snap.log.is_empty());

        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.params["url"], "http://example.com");
        assert!(queue.claim_next().await.unwrap().is_none());

        assert_eq!(queue.list_jobs().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_claim_skips_malformed_entries() {
        let (store, queue) = queue(100);
        store.list_append(keys::JOB_QUEUE_KEY, "garbage").await.unwrap();
        let id = queue.start_job(serde_json::json!({})).await.unwrap();
        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_lifecycle_success() {
        let (_store, queue) = queue(100);
        let id = queue.start_job(serde_json::json!({})).await.unwrap();
        queue.mark_running(&id).await.unwrap();
        queue.append_log(&id, "warming up").await;
        queue.complete(&id, 0, Some("/tmp/r.json")).await.unwrap();

        let snap = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(snap.record.status, Some(JobStatus::Completed));
        assert_eq!(snap.record.exit_code, Some(0));
        assert!(snap.record.started_at.is_some());
        assert!(snap.record.finished_at.is_some());
        assert_eq!(snap.record.result_path.as_deref(), Some("/tmp/r.json"));
        assert_eq!(snap.log, vec!["warming up"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_job() {
        let (_store, queue) = queue(100);
        let id = queue.start_job(serde_json::json!({})).await.unwrap();
        queue.mark_running(&id).await.unwrap();
        queue.complete(&id, 3, None).await.unwrap();

        let snap = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(snap.record.status, Some(JobStatus::Failed));
        assert_eq!(snap.log, vec!["Process exited with code 3"]);
    }

    #[tokio::test]
    async fn test_status_never_moves_backwards() {
        let (_store, queue) = queue(100);
        let id = queue.start_job(serde_json::json!({})).await.unwrap();
        queue.mark_running(&id).await.unwrap();
        queue.fail(&id, "browser crashed").await.unwrap();

        let err = queue.mark_running(&id).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        let snap = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(snap.record.status, Some(JobStatus::Failed));
        assert_eq!(snap.record.error.as_deref(), Some("browser crashed"));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_store, queue) = queue(100);
        assert!(matches!(
            queue.mark_running("nope").await,
            Err(QueueError::NotFound(_))
        ));
        assert!(queue.get_job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_log_trims_and_tracks_base() {
        let (store, queue) = queue(3);
        for i in 0..5 {
            queue.append_log("j1", &format!("line {i}")).await;
        }
        assert_eq!(store.list_length(&keys::log_key("j1")).await.unwrap(), 3);
        assert_eq!(
            store.get(&keys::log_base_key("j1")).await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(
            store.list_range(&keys::log_key("j1"), 0, 0).await.unwrap(),
            vec!["line 2"]
        );
    }

    #[tokio::test]
    async fn test_append_log_publishes() {
        let (store, queue) = queue(10);
        let mut sub = store.subscribe(keys::LOG_CHANNEL).await.unwrap();
        queue.append_log("j9", "hello").await;
        let payload = sub.next().await.unwrap();
        assert_eq!(LogEvent::parse(&payload), Some(LogEvent::new("j9", "hello")));
    }

    #[tokio::test]
    async fn test_append_log_swallows_store_errors() {
        let (store, queue) = queue(10);
        store.set_offline(true);
        // must not panic or propagate
        queue.append_log("j1", "into the void").await;
    }
}
