// crates/db/src/queries/job_logs.rs
//! Job log persistence: idempotent batch insert keyed by `(job_id, seq)`.
//!
//! The reconciler may hand the same range over twice (restart before its
//! watermark was persisted, a retained batch being retried), so inserting a
//! row that already exists is a no-op, never an error.

use std::collections::{BTreeMap, HashSet};

use crate::{Database, DbResult};
use benchstream_types::{LogRecord, LogRow};
use sqlx::{Sqlite, Transaction};

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: u64,
    /// Rows skipped because their `(job_id, seq)` was already stored.
    pub skipped: u64,
}

impl InsertOutcome {
    fn add(&mut self, other: InsertOutcome) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for LogRowWrapper {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let seq: i64 = row.try_get("seq")?;
        Ok(Self(LogRow {
            seq: seq.max(0) as u64,
            ts: row.try_get("ts")?,
            line: row.try_get("line")?,
        }))
    }
}

struct LogRowWrapper(LogRow);

/// Insert one job's rows inside `tx`, skipping seqs already present.
async fn insert_rows_tx(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
    rows: &[&LogRow],
) -> DbResult<InsertOutcome> {
    if rows.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let min_seq = rows.iter().map(|r| r.seq).min().unwrap_or(0) as i64;
    let max_seq = rows.iter().map(|r| r.seq).max().unwrap_or(0) as i64;

    let existing: Vec<(i64,)> =
        sqlx::query_as("SELECT seq FROM job_logs WHERE job_id = ? AND seq BETWEEN ? AND ?")
            .bind(job_id)
            .bind(min_seq)
            .bind(max_seq)
            .fetch_all(&mut **tx)
            .await?;
    let mut seen: HashSet<u64> = existing.into_iter().map(|(s,)| s as u64).collect();

    let mut outcome = InsertOutcome::default();
    for row in rows {
        // `seen` also catches a seq repeated within the same batch.
        if !seen.insert(row.seq) {
            outcome.skipped += 1;
            continue;
        }
        let result = sqlx::query(
            "INSERT OR IGNORE INTO job_logs (job_id, seq, ts, line) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(row.seq as i64)
        .bind(row.ts)
        .bind(&row.line)
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            outcome.skipped += 1;
        } else {
            outcome.inserted += 1;
        }
    }
    Ok(outcome)
}

impl Database {
    /// Insert a batch of log rows for one job in a single transaction.
    pub async fn insert_job_logs(&self, job_id: &str, rows: &[LogRow]) -> DbResult<InsertOutcome> {
        if rows.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let refs: Vec<&LogRow> = rows.iter().collect();
        let mut tx = self.pool().begin().await?;
        let outcome = insert_rows_tx(&mut tx, job_id, &refs).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Insert records for any number of jobs in a single transaction.
    pub async fn insert_log_records(&self, records: &[LogRecord]) -> DbResult<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let mut by_job: BTreeMap<&str, Vec<LogRow>> = BTreeMap::new();
        for rec in records {
            by_job.entry(rec.job_id.as_str()).or_default().push(rec.to_row());
        }

        let mut total = InsertOutcome::default();
        let mut tx = self.pool().begin().await?;
        for (job_id, rows) in &by_job {
            let refs: Vec<&LogRow> = rows.iter().collect();
            total.add(insert_rows_tx(&mut tx, job_id, &refs).await?);
        }
        tx.commit().await?;
        Ok(total)
    }

    /// Rows with `seq >= from_seq` in ascending order.
    pub async fn job_logs(&self, job_id: &str, from_seq: u64, limit: u32) -> DbResult<Vec<LogRow>> {
        let rows: Vec<LogRowWrapper> = sqlx::query_as(
            "SELECT seq, ts, line FROM job_logs
             WHERE job_id = ? AND seq >= ?
             ORDER BY seq ASC
             LIMIT ?",
        )
        .bind(job_id)
        .bind(from_seq as i64)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Highest stored seq for the job, if any.
    pub async fn max_log_seq(&self, job_id: &str) -> DbResult<Option<u64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(seq) FROM job_logs WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0.map(|s| s as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows(range: std::ops::Range<u64>) -> Vec<LogRow> {
        range
            .map(|seq| LogRow {
                seq,
                ts: 1_700_000_000,
                line: format!("line {seq}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let db = Database::new_in_memory().await.unwrap();
        let outcome = db.insert_job_logs("j1", &rows(0..5)).await.unwrap();
        assert_eq!(outcome, InsertOutcome { inserted: 5, skipped: 0 });

        let fetched = db.job_logs("j1", 0, 100).await.unwrap();
        assert_eq!(fetched, rows(0..5));

        let tail = db.job_logs("j1", 3, 100).await.unwrap();
        assert_eq!(tail.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3, 4]);

        let page = db.job_logs("j1", 0, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(db.max_log_seq("j1").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_duplicates_are_skipped_not_errors() {
        let db = Database::new_in_memory().await.unwrap();
        db.insert_job_logs("j1", &rows(0..3)).await.unwrap();

        // overlapping replay: 1..5 → only 3 and 4 are new
        let outcome = db.insert_job_logs("j1", &rows(1..5)).await.unwrap();
        assert_eq!(outcome, InsertOutcome { inserted: 2, skipped: 3 });

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_logs WHERE job_id = 'j1'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 5);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_batch() {
        let db = Database::new_in_memory().await.unwrap();
        let mut batch = rows(0..2);
        batch.push(batch[0].clone());
        let outcome = db.insert_job_logs("j1", &batch).await.unwrap();
        assert_eq!(outcome, InsertOutcome { inserted: 2, skipped: 1 });
    }

    #[tokio::test]
    async fn test_insert_log_records_spans_jobs() {
        let db = Database::new_in_memory().await.unwrap();
        let records: Vec<LogRecord> = (0..3)
            .flat_map(|seq| {
                ["a", "b"].map(|job| LogRecord {
                    job_id: job.to_string(),
                    seq,
                    ts: 1,
                    line: format!("{job}-{seq}"),
                })
            })
            .collect();

        let outcome = db.insert_log_records(&records).await.unwrap();
        assert_eq!(outcome.inserted, 6);

        let again = db.insert_log_records(&records).await.unwrap();
        assert_eq!(again, InsertOutcome { inserted: 0, skipped: 6 });

        let b = db.job_logs("b", 0, 10).await.unwrap();
        assert_eq!(b.iter().map(|r| r.line.as_str()).collect::<Vec<_>>(), vec!["b-0", "b-1", "b-2"]);
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let db = Database::new_in_memory().await.unwrap();
        assert_eq!(db.insert_job_logs("j1", &[]).await.unwrap(), InsertOutcome::default());
        assert_eq!(db.insert_log_records(&[]).await.unwrap(), InsertOutcome::default());
        assert!(db.job_logs("j1", 0, 10).await.unwrap().is_empty());
        assert_eq!(db.max_log_seq("j1").await.unwrap(), None);
    }
}
