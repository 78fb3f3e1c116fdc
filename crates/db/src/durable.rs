// crates/db/src/durable.rs
//! `DurableStore` capability over the SQLite database.

use async_trait::async_trait;
use benchstream_core::{DurableStore, StoreResult};
use benchstream_types::{JobRecord, LogRecord, LogRow};

use crate::Database;

#[async_trait]
impl DurableStore for Database {
    async fn upsert_job(&self, record: &JobRecord) -> StoreResult<()> {
        Ok(Database::upsert_job(self, record).await?)
    }

    async fn insert_log_batch(&self, job_id: &str, rows: &[LogRow]) -> StoreResult<u64> {
        let outcome = self.insert_job_logs(job_id, rows).await?;
        if outcome.skipped > 0 {
            tracing::debug!(job_id, skipped = outcome.skipped, "Skipped already-stored log rows");
        }
        Ok(outcome.inserted)
    }

    async fn insert_log_records(&self, records: &[LogRecord]) -> StoreResult<u64> {
        let outcome = Database::insert_log_records(self, records).await?;
        if outcome.skipped > 0 {
            tracing::debug!(skipped = outcome.skipped, "Skipped already-stored log rows");
        }
        Ok(outcome.inserted)
    }

    async fn query_jobs(&self, limit: u32) -> StoreResult<Vec<JobRecord>> {
        Ok(self.recent_jobs(limit).await?)
    }

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<JobRecord>> {
        Ok(self.job_by_id(job_id).await?)
    }

    async fn query_logs(&self, job_id: &str, from_seq: u64, limit: u32) -> StoreResult<Vec<LogRow>> {
        Ok(self.job_logs(job_id, from_seq, limit).await?)
    }
}
