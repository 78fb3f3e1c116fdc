// crates/db/src/lib.rs
//! SQLite history for benchstream: one row per job plus its log lines.

mod durable;
mod migrations;
mod queries;

pub use queries::job_logs::InsertOutcome;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("no cache directory for the default database location")]
    NoCacheDir,

    #[error("cannot create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for benchstream_core::StoreError {
    fn from(err: DbError) -> Self {
        if matches!(
            err,
            DbError::Sqlx(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
        ) {
            return benchstream_core::StoreError::Unavailable(err.to_string());
        }
        benchstream_core::StoreError::backend(err)
    }
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const SLOW_STATEMENT: Duration = Duration::from_secs(5);

/// Pooled handle to the history database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// Open or create the database file at `path`, creating parent
    /// directories, and bring the schema up to date.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().max_connections(4);
        let db = Self::connect(options, pool, path.to_path_buf()).await?;
        tracing::info!(path = %path.display(), "History database opened");
        Ok(db)
    }

    /// Private in-memory database for tests and throwaway runs.
    ///
    /// One connection that is never recycled: each connection to `:memory:`
    /// sees its own database, and closing it discards the data.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::connect(options, pool, PathBuf::new()).await
    }

    /// Open `~/.cache/benchstream/benchstream.db`.
    pub async fn open_default() -> DbResult<Self> {
        Self::new(&default_db_path()?).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        pool: SqlitePoolOptions,
        db_path: PathBuf,
    ) -> DbResult<Self> {
        let options = options
            .busy_timeout(BUSY_TIMEOUT)
            .log_slow_statements(tracing::log::LevelFilter::Warn, SLOW_STATEMENT);
        let pool = pool.connect_with(options).await?;
        let db = Self { pool, db_path };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply every migration newer than the recorded schema version, each in
    /// its own transaction together with its version row.
    async fn migrate(&self) -> DbResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;
        let (applied,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        for (version, sql) in (1_i64..).zip(migrations::MIGRATIONS) {
            if version <= applied {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            sqlx::query(sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::debug!(version, "Applied schema migration");
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// File backing this database; empty for in-memory databases.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

pub fn default_db_path() -> DbResult<PathBuf> {
    benchstream_core::config::default_db_path().ok_or(DbError::NoCacheDir)
}
