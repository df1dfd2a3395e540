//! Memory-over-disk key/value store.
//!
//! Writes go to the durable tier first and reach memory only after the disk
//! acknowledges, so a failed write leaves both tiers holding the previous
//! value and a concurrent reader never sees an uncommitted one. Reads are
//! served from memory and fall through to disk on a miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::durable::DurableStore;
use super::memory::MemoryTier;
use crate::Error;

pub struct TieredStore<V> {
    durable: Arc<dyn DurableStore>,
    memory: MemoryTier<V>,
    /// Per-key write locks; puts to one key are applied to both tiers in order.
    write_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

impl<V> TieredStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            durable,
            memory: MemoryTier::default(),
            write_locks: parking_lot::Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Commit `value` under `key` and return the committed value.
    ///
    /// # Errors
    ///
    /// `StorageWrite` if encoding or the durable write fails; memory keeps its
    /// prior value in that case. `StoreClosed` after [`close`](Self::close).
    pub async fn put(&self, key: &str, value: V) -> Result<Arc<V>, Error> {
        self.ensure_open()?;

        let encoded = serde_json::to_string(&value)
            .map_err(|e| Error::StorageWrite { key: key.to_string(), cause: e.to_string() })?;

        let lock = self.write_lock(key);
        let _guard = lock.lock().await;

        if let Err(e) = self.durable.put(key, encoded).await {
            tracing::warn!(key = %key, error = %e, "durable write failed; keeping previous value");
            return Err(match e {
                Error::StoreClosed => Error::StoreClosed,
                other => Error::StorageWrite { key: key.to_string(), cause: other.to_string() },
            });
        }

        let value = Arc::new(value);
        let replaced = self.memory.insert(key, value.clone()).is_some();
        tracing::debug!(key = %key, replaced, "committed");
        Ok(value)
    }

    /// Fetch the value under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when neither tier holds the key, `StorageRead` when the disk
    /// read or decode fails, `StoreClosed` after [`close`](Self::close).
    pub async fn get(&self, key: &str) -> Result<Arc<V>, Error> {
        self.ensure_open()?;

        if let Some(value) = self.memory.get(key) {
            tracing::trace!(key = %key, "memory hit");
            return Ok(value);
        }

        let raw = match self.durable.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(Error::NotFound(key.to_string())),
            Err(Error::StoreClosed) => return Err(Error::StoreClosed),
            Err(e) => return Err(Error::StorageRead { key: key.to_string(), cause: e.to_string() }),
        };

        let value: V = serde_json::from_str(&raw)
            .map_err(|e| Error::StorageRead { key: key.to_string(), cause: e.to_string() })?;

        tracing::debug!(key = %key, "loaded from disk");
        Ok(self.memory.insert_if_absent(key, Arc::new(value)))
    }

    /// True when a value is stored under `key`.
    pub async fn contains(&self, key: &str) -> Result<bool, Error> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All stored keys, sorted.
    ///
    /// Served from memory once [`preload`](Self::preload) has mirrored the
    /// whole durable tier; streamed from disk otherwise.
    pub async fn list_keys(&self) -> Result<Vec<String>, Error> {
        self.ensure_open()?;

        if self.memory.is_complete() {
            return Ok(self.memory.keys());
        }

        self.durable.keys().await.map_err(|e| match e {
            Error::StoreClosed => Error::StoreClosed,
            other => Error::StorageRead { key: "*".to_string(), cause: other.to_string() },
        })
    }

    /// Mirror every durable entry into memory.
    ///
    /// Entries that fail to decode are skipped with a warning; they surface
    /// as `StorageRead` on a later `get`, and `list_keys` keeps consulting
    /// the disk since memory no longer holds every key.
    pub async fn preload(&self) -> Result<usize, Error> {
        self.ensure_open()?;

        let entries = self
            .durable
            .entries()
            .await
            .map_err(|e| Error::StorageRead { key: "*".to_string(), cause: e.to_string() })?;

        let total = entries.len();
        let mut loaded = 0;
        for (key, raw) in entries {
            match serde_json::from_str::<V>(&raw) {
                Ok(value) => {
                    self.memory.insert_if_absent(&key, Arc::new(value));
                    loaded += 1;
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping undecodable entry"),
            }
        }

        if loaded == total {
            self.memory.mark_complete();
        }
        tracing::info!(loaded, skipped = total - loaded, cached = self.memory.len(), "preloaded durable store");
        Ok(loaded)
    }

    /// Flush and release the durable tier.
    ///
    /// Idempotent; every later operation fails with `StoreClosed`.
    pub async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.memory.clear();
        self.durable.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() { Err(Error::StoreClosed) } else { Ok(()) }
    }

    fn write_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}
