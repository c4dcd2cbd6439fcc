//! SQLite implementation of the drive view.
//!
//! Same semantics as [`DriveView`](crate::DriveView), persisted with rusqlite
//! and wrapped in async via `tokio::task::spawn_blocking`.
//!
//! Writes accumulate in one open transaction that [`View::flush`] commits, so
//! an apply batch becomes durable as a unit. Dropping the view with writes
//! still pending rolls them back.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{FileEntry, Matcher, View, ViewKind};

/// Entries fetched per round trip when scanning.
const SCAN_PAGE: i64 = 256;

/// SQLite-backed drive view.
///
/// Thread-safe via internal Mutex. All I/O runs on the blocking pool.
pub struct SqliteDrive {
    conn: Arc<Mutex<Connection>>,
    closed: bool,
}

impl SqliteDrive {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            closed: false,
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            closed: false,
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed {
            return Err(StoreError::Closed);
        }

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

/// Open the write transaction if none is pending.
fn begin(conn: &Connection) -> Result<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN")?;
    }
    Ok(())
}

fn commit(conn: &Connection) -> Result<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("COMMIT")?;
    }
    Ok(())
}

fn parse_value(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| StoreError::InvalidData(e.to_string()))
}

#[async_trait]
impl View for SqliteDrive {
    fn kind(&self) -> ViewKind {
        ViewKind::Drive
    }

    async fn append(&mut self, value: Value) -> Result<u64> {
        let text = serde_json::to_string(&value)?;
        self.run(move |conn| {
            begin(conn)?;
            let seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq) + 1, 0) FROM entries",
                [],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO entries (seq, value) VALUES (?1, ?2)",
                params![seq, text],
            )?;
            Ok(seq as u64)
        })
        .await
    }

    async fn len(&self) -> Result<u64> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn entry(&self, index: u64) -> Result<Option<Value>> {
        let Ok(seq) = i64::try_from(index) else {
            return Ok(None);
        };
        let text: Option<String> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM entries WHERE seq = ?1",
                        params![seq],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        text.as_deref().map(parse_value).transpose()
    }

    async fn find(&self, matcher: &Matcher<'_>) -> Result<Option<Value>> {
        let mut after = -1i64;
        loop {
            let page: Vec<(i64, String)> = self
                .run(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT seq, value FROM entries WHERE seq > ?1 ORDER BY seq LIMIT ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![after, SCAN_PAGE], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    Ok(rows)
                })
                .await?;

            let Some((last, _)) = page.last() else {
                return Ok(None);
            };
            after = *last;

            for (_, text) in &page {
                let value = parse_value(text)?;
                if matcher(&value) {
                    return Ok(Some(value));
                }
            }
        }
    }

    async fn put(&mut self, path: &str, blob: Bytes) -> Result<()> {
        let path = path.to_string();
        self.run(move |conn| {
            begin(conn)?;
            conn.execute("INSERT INTO blobs (data) VALUES (?1)", params![&blob[..]])?;
            let blob_id = conn.last_insert_rowid();
            conn.execute(
                "INSERT OR REPLACE INTO files (path, blob_id, size) VALUES (?1, ?2, ?3)",
                params![path, blob_id, blob.len() as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        let path = path.to_string();
        self.run(move |conn| {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT b.data FROM files f JOIN blobs b ON b.blob_id = f.blob_id
                     WHERE f.path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.map(Bytes::from))
        })
        .await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM files WHERE path = ?1", params![path], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn delete(&mut self, path: &str) -> Result<bool> {
        let path = path.to_string();
        self.run(move |conn| {
            begin(conn)?;
            let removed = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileEntry>> {
        let prefix = prefix.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT path, size FROM files
                 WHERE substr(path, 1, length(?1)) = ?1
                 ORDER BY path",
            )?;
            let files = stmt
                .query_map(params![prefix], |row| {
                    let size: i64 = row.get(1)?;
                    Ok(FileEntry {
                        path: row.get(0)?,
                        size: size as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(files)
        })
        .await
    }

    async fn flush(&mut self) -> Result<()> {
        self.run(|conn| commit(conn)).await
    }

    async fn clear(&mut self) -> Result<()> {
        self.run(|conn| {
            begin(conn)?;
            conn.execute_batch(
                "DELETE FROM files;
                 DELETE FROM blobs;
                 DELETE FROM entries;",
            )?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.run(|conn| commit(conn)).await;
        self.closed = true;
        result
    }
}
