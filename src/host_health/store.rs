//! Durable URL index backing the lazy-task backlog
//!
//! A thin ordered key/value layer over SQLite. URLs are grouped under fixed
//! logical page numbers, one per backlog category; the tracker addresses
//! pages by number and never sees SQL. WAL mode keeps concurrent readers
//! cheap during writes.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

/// Lazy-fetch backlogs live at base + fetch-mode ordinal
pub const LAZY_FETCH_URLS_PAGE_BASE: i64 = 100;
/// Shared timeout backlog, independent of fetch mode
pub const TIMEOUT_URLS_PAGE: i64 = 1000;
pub const FAILED_URLS_PAGE: i64 = 1001;
pub const DEAD_URLS_PAGE: i64 = 1002;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tracked_urls (
    page_no INTEGER NOT NULL,
    url     TEXT    NOT NULL,
    PRIMARY KEY (page_no, url)
);
";

/// Errors surfaced by the task store.
///
/// The tracker logs these and keeps its in-memory state; they never
/// propagate past the health-tracking layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("task store query: {0}")]
    Db(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent ordered URL index, shared by every tracker over one database
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open or create the store at the given database path
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Append URLs to a page. Duplicates collapse via the primary key.
    pub async fn index_all<I, S>(&self, page_no: i64, urls: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tx = self.pool.begin().await?;
        for url in urls {
            sqlx::query("INSERT OR IGNORE INTO tracked_urls (page_no, url) VALUES (?, ?)")
                .bind(page_no)
                .bind(url.as_ref())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Non-destructive read of a whole page, ordered by URL
    pub async fn get_all(&self, page_no: i64) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT url FROM tracked_urls WHERE page_no = ? ORDER BY url")
            .bind(page_no)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// Atomically remove and return up to `n` URLs from a page
    pub async fn take_n(&self, page_no: i64, n: usize) -> StoreResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let rows =
            sqlx::query("SELECT url FROM tracked_urls WHERE page_no = ? ORDER BY url LIMIT ?")
                .bind(page_no)
                .bind(n as i64)
                .fetch_all(&mut *tx)
                .await?;
        let urls: Vec<String> = rows.iter().map(|r| r.get::<String, _>(0)).collect();
        for url in &urls {
            sqlx::query("DELETE FROM tracked_urls WHERE page_no = ? AND url = ?")
                .bind(page_no)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(urls)
    }

    /// Atomically remove and return a whole page
    pub async fn take_all(&self, page_no: i64) -> StoreResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT url FROM tracked_urls WHERE page_no = ? ORDER BY url")
            .bind(page_no)
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tracked_urls WHERE page_no = ?")
            .bind(page_no)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    /// Push pending WAL frames into the main database file
    pub async fn flush(&self) -> StoreResult<()> {
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
