//! SQLite-backed cache stores.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::cache::{CacheEntry, KeyValueCacheStore};
use crate::error::{OfflineError, Result};
use crate::http::{Headers, HttpResponse};

/// Schema for cache tables.
///
/// `seq` increases on every write, so ordering by it yields insertion order;
/// `INSERT OR REPLACE` on an existing key assigns a fresh `seq`.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at INTEGER,
    UNIQUE (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_name ON cache_entries(cache_name, seq);
"#;

/// Durable cache stores in one SQLite database.
///
/// Statements run on the blocking pool so a slow disk never stalls the
/// async workers.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Opens (or creates) the database at `path`.
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

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CACHE_SCHEMA)?;
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
        .map_err(|e| OfflineError::Internal(format!("Storage task failed: {}", e)))?
    }
}

#[async_trait]
impl KeyValueCacheStore for SqliteCacheStore {
    async fn open(&self, cache_name: &str) -> Result<()> {
        let cache_name = cache_name.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
                params![cache_name],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<CacheEntry>> {
        let (cache_name, key) = (cache_name.to_string(), key.to_string());
        let row: Option<(u16, String, String, Vec<u8>, Option<i64>)> = self
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT status, status_text, headers, body, cached_at FROM cache_entries
                         WHERE cache_name = ? AND request_key = ?",
                        params![cache_name, key],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((status, status_text, headers, body, cached_at)) = row else {
            return Ok(None);
        };
        let headers: Headers = serde_json::from_str(&headers)?;
        Ok(Some(CacheEntry {
            response: HttpResponse {
                status,
                status_text,
                headers,
                body,
            },
            cached_at: cached_at.map(|t| t as u64),
        }))
    }

    async fn put(&self, cache_name: &str, key: &str, entry: CacheEntry) -> Result<()> {
        let headers = serde_json::to_string(&entry.response.headers)?;
        let (cache_name, key) = (cache_name.to_string(), key.to_string());
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
                params![cache_name],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO cache_entries
                 (cache_name, request_key, status, status_text, headers, body, cached_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    cache_name,
                    key,
                    entry.response.status,
                    entry.response.status_text,
                    headers,
                    entry.response.body,
                    entry.cached_at.map(|t| t as i64),
                ],
            )?;
            tx.commit()?;
            debug!("Stored {} in {}", key, cache_name);
            Ok(())
        })
        .await
    }

    async fn delete(&self, cache_name: &str, key: &str) -> Result<bool> {
        let (cache_name, key) = (cache_name.to_string(), key.to_string());
        self.call(move |conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE cache_name = ? AND request_key = ?",
                params![cache_name, key],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn keys(&self, cache_name: &str) -> Result<Vec<String>> {
        let cache_name = cache_name.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT request_key FROM cache_entries WHERE cache_name = ? ORDER BY seq ASC",
            )?;
            let keys = stmt
                .query_map(params![cache_name], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn cache_names(&self) -> Result<Vec<String>> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM cache_stores ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }

    async fn delete_cache(&self, cache_name: &str) -> Result<bool> {
        let cache_name = cache_name.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM cache_entries WHERE cache_name = ?",
                params![cache_name],
            )?;
            let removed =
                tx.execute("DELETE FROM cache_stores WHERE name = ?", params![cache_name])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }
}
