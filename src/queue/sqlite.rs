//! SQLite-backed request queue.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{OfflineError, Result};
use crate::queue::{
    NewQueuedRequest, OrderedRecordQueue, QueueCounts, QueueStatus, QueueUpdate, QueuedRequest,
};

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queued_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    metadata TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retries INTEGER NOT NULL DEFAULT 0,
    last_attempt INTEGER,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_queued_requests_status ON queued_requests(status);
CREATE INDEX IF NOT EXISTS idx_queued_requests_created ON queued_requests(created_at);
"#;

const SELECT_COLUMNS: &str = "SELECT id, url, method, headers, body, metadata, created_at, \
     status, retries, last_attempt, last_error FROM queued_requests";

/// Durable queue in one SQLite database. Survives process restarts.
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OfflineError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the locked connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| OfflineError::Storage(format!("Lock poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| OfflineError::Internal(format!("Queue task failed: {}", e)))?
    }
}

/// Raw column values; JSON and status decoding happens outside the row closure.
struct RawRecord {
    id: i64,
    url: String,
    method: String,
    headers: String,
    body: Option<String>,
    metadata: String,
    created_at: i64,
    status: String,
    retries: u32,
    last_attempt: Option<i64>,
    last_error: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            method: row.get(2)?,
            headers: row.get(3)?,
            body: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
            status: row.get(7)?,
            retries: row.get(8)?,
            last_attempt: row.get(9)?,
            last_error: row.get(10)?,
        })
    }

    fn decode(self) -> Result<QueuedRequest> {
        Ok(QueuedRequest {
            id: self.id,
            url: self.url,
            method: self.method,
            headers: serde_json::from_str(&self.headers)?,
            body: self.body,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: self.created_at as u64,
            status: self.status.parse()?,
            retries: self.retries,
            last_attempt: self.last_attempt.map(|t| t as u64),
            last_error: self.last_error,
        })
    }
}

fn fetch_one(conn: &Connection, id: i64) -> Result<Option<QueuedRequest>> {
    conn.query_row(
        &format!("{} WHERE id = ?", SELECT_COLUMNS),
        params![id],
        RawRecord::from_row,
    )
    .optional()?
    .map(RawRecord::decode)
    .transpose()
}

#[async_trait]
impl OrderedRecordQueue for SqliteQueue {
    async fn insert(&self, request: NewQueuedRequest) -> Result<i64> {
        let headers = serde_json::to_string(&request.headers)?;
        let metadata = serde_json::to_string(&request.metadata)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO queued_requests (url, method, headers, body, metadata, created_at, status, retries)
                 VALUES (?, ?, ?, ?, ?, ?, 'pending', 0)",
                params![
                    request.url,
                    request.method,
                    headers,
                    request.body,
                    metadata,
                    request.created_at as i64
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Inserted queue record {}", id);
            Ok(id)
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<QueuedRequest>> {
        self.call(move |conn| fetch_one(conn, id)).await
    }

    async fn list(&self, status: QueueStatus) -> Result<Vec<QueuedRequest>> {
        self.call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("{} WHERE status = ? ORDER BY id ASC", SELECT_COLUMNS))?;
            let raws = stmt
                .query_map(params![status.as_str()], RawRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raws.into_iter().map(RawRecord::decode).collect()
        })
        .await
    }

    async fn update(&self, id: i64, update: QueueUpdate) -> Result<QueuedRequest> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut record = fetch_one(&tx, id)?.ok_or(OfflineError::QueueEntryNotFound(id))?;
            update.apply(&mut record);
            tx.execute(
                "UPDATE queued_requests SET status = ?, retries = ?, last_attempt = ?, last_error = ?
                 WHERE id = ?",
                params![
                    record.status.as_str(),
                    record.retries,
                    record.last_attempt.map(|t| t as i64),
                    record.last_error,
                    id
                ],
            )?;
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        self.call(move |conn| {
            let removed = conn.execute("DELETE FROM queued_requests WHERE id = ?", params![id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let rows = self
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM queued_requests GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut counts = QueueCounts::default();
        for (status, n) in rows {
            let n = n as usize;
            counts.total += n;
            match status.parse::<QueueStatus>()? {
                QueueStatus::Pending => counts.pending += n,
                QueueStatus::Failed => counts.failed += n,
            }
        }
        Ok(counts)
    }

    async fn remove_with_status(&self, status: QueueStatus) -> Result<Vec<i64>> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt =
                    tx.prepare("SELECT id FROM queued_requests WHERE status = ? ORDER BY id ASC")?;
                let ids = stmt
                    .query_map(params![status.as_str()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                ids
            };
            tx.execute(
                "DELETE FROM queued_requests WHERE status = ?",
                params![status.as_str()],
            )?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }
}
