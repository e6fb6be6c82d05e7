//! Storage layer: SQLite backup ledger.
//!
//! Holds DB pool setup, the migration runner and the append-only ledger of
//! relocated files.

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::debug;

pub const IN_MEMORY: &str = "sqlite::memory:";

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    let opts = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let mut pool_opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        // Every connection to a private in-memory database sees its own copy.
        pool_opts = pool_opts
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        pool_opts = pool_opts.max_connections(5);
    }
    let pool = pool_opts.connect_with(opts).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Idempotent; migrations live in crates/storage/migrations.
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One relocated file. Rows are only ever inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LedgerRecord {
    pub run_id: String,
    pub original_path: String,
    pub backup_path: String,
    pub moved_at: i64,
    pub size: i64,
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub async fn open(database_url: &str) -> anyhow::Result<Self> {
        let pool = connect(database_url).await?;
        migrate(&pool).await?;
        debug!(url = database_url, "ledger opened");
        Ok(Self { pool })
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::open(IN_MEMORY).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Appends a row. Returns `false` when the run already recorded this path.
    pub async fn append(&self, record: &LedgerRecord) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO backup_entries (run_id, original_path, backup_path, moved_at, size)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&record.run_id)
        .bind(&record.original_path)
        .bind(&record.backup_path)
        .bind(record.moved_at)
        .bind(record.size)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn contains(&self, run_id: &str, original_path: &str) -> anyhow::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM backup_entries WHERE run_id = ?1 AND original_path = ?2",
        )
        .bind(run_id)
        .bind(original_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Rows in insertion order, optionally restricted to one run.
    pub async fn entries(&self, run_id: Option<&str>) -> anyhow::Result<Vec<LedgerRecord>> {
        let rows = match run_id {
            Some(run) => {
                sqlx::query_as::<_, LedgerRecord>(
                    "SELECT run_id, original_path, backup_path, moved_at, size
                     FROM backup_entries WHERE run_id = ?1 ORDER BY id",
                )
                .bind(run)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, LedgerRecord>(
                    "SELECT run_id, original_path, backup_path, moved_at, size
                     FROM backup_entries ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn runs(&self) -> anyhow::Result<Vec<String>> {
        let runs: Vec<String> = sqlx::query_scalar(
            "SELECT run_id FROM backup_entries GROUP BY run_id ORDER BY MIN(id)",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}
