// crates/db/src/queries/jobs.rs
//! Job metadata persistence: full-row replace per job, newest-first listing.

use crate::{Database, DbResult};
use benchstream_core::now_ts;
use benchstream_types::{JobRecord, JobStatus};
use sqlx::Row;

const JOB_COLUMNS: &str = "id, status, created_at, started_at, finished_at, exit_code, \
                           result_path, error, params, last_updated";

struct JobRow(JobRecord);

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let status: Option<String> = row.try_get("status")?;
        let params: Option<String> = row.try_get("params")?;
        Ok(Self(JobRecord {
            id: row.try_get("id")?,
            status: status.as_deref().and_then(JobStatus::parse),
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            exit_code: row.try_get("exit_code")?,
            result_path: row.try_get("result_path")?,
            error: row.try_get("error")?,
            params: params.map(|raw| {
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
            }),
            last_updated: row.try_get("last_updated")?,
        }))
    }
}

impl Database {
    /// Replace the job's row with `record` (delete-then-insert in one
    /// transaction). Columns absent from `record` end up NULL.
    pub async fn upsert_job(&self, record: &JobRecord) -> DbResult<()> {
        let params = record.params.as_ref().map(|p| match p {
            // Unparseable params are kept as their raw text; the reader maps
            // that back to the same string.
            serde_json::Value::String(s) if serde_json::from_str::<serde_json::Value>(s).is_err() => {
                s.clone()
            }
            other => other.to_string(),
        });

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO jobs (id, status, created_at, started_at, finished_at, exit_code,
                               result_path, error, params, last_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.status.map(|s| s.as_str()))
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.exit_code)
        .bind(&record.result_path)
        .bind(&record.error)
        .bind(params)
        .bind(now_ts())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Most recently created jobs first; jobs with no `created_at` last.
    pub async fn recent_jobs(&self, limit: u32) -> DbResult<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id ASC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn job_by_id(&self, job_id: &str) -> DbResult<Option<JobRecord>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(job_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|r| r.0))
    }
}
