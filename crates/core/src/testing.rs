//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::Error;
use crate::config::{HttpOptions, ServiceConfig};
use crate::fetch::{FetchedPayload, Fetcher};
use crate::store::DurableStore;

pub(crate) fn users_body() -> Value {
    json!([
        { "user": "barney", "age": 36, "active": true },
        { "user": "fred", "age": 40, "active": false }
    ])
}

pub(crate) fn users_service() -> ServiceConfig {
    ServiceConfig {
        name: "users".into(),
        cron_expression: "0 0 0 1 1 *".into(),
        http_options: Some(HttpOptions::get("http://localhost:8081/users")),
        indexes: vec!["user".into(), "active".into()],
        ..Default::default()
    }
}

enum Reply {
    Body(Value),
    Status(u16),
    Unreachable,
}

/// Fetcher that answers from a script and can hold requests at a gate.
pub(crate) struct MockFetcher {
    reply: Mutex<Reply>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl MockFetcher {
    fn with(reply: Reply) -> Self {
        Self { reply: Mutex::new(reply), calls: AtomicUsize::new(0), gate: None }
    }

    pub(crate) fn ok(body: Value) -> Self {
        Self::with(Reply::Body(body))
    }

    pub(crate) fn status(status: u16) -> Self {
        Self::with(Reply::Status(status))
    }

    pub(crate) fn unreachable() -> Self {
        Self::with(Reply::Unreachable)
    }

    /// Every fetch waits for one `notify_one` on `gate` before answering.
    pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn set_ok(&self, body: Value) {
        *self.reply.lock() = Reply::Body(body);
    }

    pub(crate) fn set_status(&self, status: u16) {
        *self.reply.lock() = Reply::Status(status);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, _options: &HttpOptions) -> Result<FetchedPayload, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &*self.reply.lock() {
            Reply::Body(body) => Ok(FetchedPayload {
                status: 200,
                headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
                body: body.clone(),
            }),
            Reply::Status(500) => Err(Error::Http { status: 500, reason: "Internal Server Error".into() }),
            Reply::Status(status) => Err(Error::Http { status: *status, reason: "Unavailable".into() }),
            Reply::Unreachable => Err(Error::Transport("connection refused".into())),
        }
    }
}

/// In-memory durable tier that fails writes or reads on demand and counts reads.
#[derive(Default)]
pub(crate) struct FlakyDurable {
    entries: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    failing_reads: AtomicBool,
    reads: AtomicUsize,
}

impl FlakyDurable {
    pub(crate) fn fail_writes(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_reads(&self, on: bool) {
        self.failing_reads.store(on, Ordering::SeqCst);
    }

    fn check_reads(&self, key: &str) -> Result<(), Error> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(Error::StorageRead { key: key.to_string(), cause: "i/o error".into() });
        }
        Ok(())
    }

    pub(crate) fn insert_raw(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for FlakyDurable {
    async fn put(&self, key: &str, value: String) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::StorageWrite { key: key.to_string(), cause: "disk full".into() });
        }
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_reads(key)?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        self.check_reads("*")?;
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn entries(&self) -> Result<Vec<(String, String)>, Error> {
        self.check_reads("*")?;
        let mut entries: Vec<(String, String)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
