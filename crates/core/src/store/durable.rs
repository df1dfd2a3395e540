//! Durable key/value tier.
//!
//! [`DurableStore`] is the seam between the tiered store and whatever keeps
//! values across restarts. [`SqliteStore`] is the production provider: one
//! SQLite file in WAL mode, opened through tokio-rusqlite so every statement
//! runs on a background thread and never blocks the runtime.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_rusqlite::{Connection, params, rusqlite};

use super::migrations;
use crate::Error;

/// File name of the durable store inside the configured location.
pub const DB_FILE_NAME: &str = "node-http-cache.db";

/// A disk-backed map from UTF-8 keys to JSON-encoded values.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: String) -> Result<(), Error>;

    /// Read the value under `key`; `Ok(None)` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Every stored key, in key order.
    async fn keys(&self) -> Result<Vec<String>, Error>;

    /// Every stored entry, in key order.
    async fn entries(&self) -> Result<Vec<(String, String)>, Error>;

    /// Flush and release the underlying handle.
    async fn close(&self) -> Result<(), Error>;
}

/// SQLite-backed durable store.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    closed: AtomicBool,
}

impl SqliteStore {
    /// Open (or create) `location/node-http-cache.db`.
    pub async fn open_in_dir(location: impl AsRef<Path>) -> Result<Self, Error> {
        let location = location.as_ref();
        std::fs::create_dir_all(location).map_err(|e| Error::StorageWrite {
            key: location.display().to_string(),
            cause: e.to_string(),
        })?;
        Self::open(location.join(DB_FILE_NAME)).await
    }

    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies pragmas and runs any
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        tracing::debug!(path = %path.as_ref().display(), "opening durable store");
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA temp_store=MEMORY;",
            )?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn, closed: AtomicBool::new(false) })
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) { Err(Error::StoreClosed) } else { Ok(()) }
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn put(&self, key: &str, value: String) -> Result<(), Error> {
        self.ensure_open()?;
        let key = key.to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                    params![key, value, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.ensure_open()?;
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let result = conn.query_row("SELECT value FROM entries WHERE key = ?1", params![key], |row| row.get(0));

                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        self.ensure_open()?;
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM entries ORDER BY key")?;
                let keys = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    async fn entries(&self) -> Result<Vec<(String, String)>, Error> {
        self.ensure_open()?;
        self.conn
            .call(|conn| -> Result<Vec<(String, String)>, Error> {
                let mut stmt = conn.prepare("SELECT key, value FROM entries ORDER BY key")?;
                let entries = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<(String, String)>, _>>()?;
                Ok(entries)
            })
            .await
            .map_err(Error::from)
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("closing durable store");
        self.conn
            .call(|conn| conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())))
            .await
            .map_err(Error::Database)?;
        self.conn
            .clone()
            .close()
            .await
            .map_err(|e| Error::StorageWrite { key: DB_FILE_NAME.to_string(), cause: e.to_string() })
    }
}
