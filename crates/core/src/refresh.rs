//! Fetch → index → commit, one source at a time.
//!
//! Each source moves through `Idle → Fetching → Indexing → Committing → Idle`.
//! Any failure passes through `Failed`, emits exactly one `updateError`, and
//! returns to `Idle` so the next tick may try again. A trigger that arrives
//! while the source is busy is dropped, not queued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Error;
use crate::config::{ConfigError, ServiceConfig};
use crate::event::{CacheEvent, EventBus};
use crate::fetch::Fetcher;
use crate::index::{IndexBuilder, Indexes};
use crate::snapshot::{Snapshot, extract_records};
use crate::store::TieredStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Fetching,
    Indexing,
    Committing,
    Failed,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The new snapshot is committed and visible to readers.
    Committed(Arc<Snapshot>),
    /// Another refresh of the same source was already in flight.
    Skipped,
}

type StateTable = Mutex<HashMap<String, RefreshState>>;

/// Marks a source busy for as long as it lives.
///
/// Dropping the guard returns the source to `Idle`, whatever path the
/// refresh took out.
struct InFlight<'a> {
    states: &'a StateTable,
    name: &'a str,
}

impl<'a> InFlight<'a> {
    fn begin(states: &'a StateTable, name: &'a str) -> Option<Self> {
        let mut table = states.lock();
        match table.get(name) {
            Some(state) if *state != RefreshState::Idle => None,
            _ => {
                table.insert(name.to_string(), RefreshState::Fetching);
                Some(Self { states, name })
            }
        }
    }

    fn enter(&self, state: RefreshState) {
        tracing::trace!(source = %self.name, ?state, "refresh state");
        self.states.lock().insert(self.name.to_string(), state);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.states.lock().remove(self.name);
    }
}

pub struct Refresher {
    store: Arc<TieredStore<Snapshot>>,
    fetcher: Arc<dyn Fetcher>,
    indexer: IndexBuilder,
    events: EventBus,
    states: StateTable,
}

impl Refresher {
    pub fn new(
        store: Arc<TieredStore<Snapshot>>, fetcher: Arc<dyn Fetcher>, indexer: IndexBuilder, events: EventBus,
    ) -> Self {
        Self { store, fetcher, indexer, events, states: Mutex::new(HashMap::new()) }
    }

    /// Current state of `name`; sources never refreshed are `Idle`.
    pub fn state(&self, name: &str) -> RefreshState {
        self.states
            .lock()
            .get(name)
            .copied()
            .unwrap_or(RefreshState::Idle)
    }

    /// Run one refresh of `service` unless one is already in flight.
    ///
    /// # Errors
    ///
    /// `Fetch`, `Index` or `Commit`, each naming the source. The error has
    /// already been published as `updateError` when this returns.
    pub async fn refresh(&self, service: &ServiceConfig) -> Result<RefreshOutcome, Error> {
        let name = service.name.as_str();
        let Some(guard) = InFlight::begin(&self.states, name) else {
            tracing::debug!(source = %name, "refresh already in flight; dropping trigger");
            return Ok(RefreshOutcome::Skipped);
        };

        tracing::info!(source = %name, "updating service");
        match self.run(service, &guard).await {
            Ok(snapshot) => {
                tracing::info!(source = %name, records = snapshot.len(), "service updated");
                self.events
                    .emit(CacheEvent::UpdateData { name: name.to_string(), data: snapshot.records.clone() });
                Ok(RefreshOutcome::Committed(snapshot))
            }
            Err(e) => {
                guard.enter(RefreshState::Failed);
                tracing::warn!(source = %name, error = %e, "service update failed");
                self.events
                    .emit(CacheEvent::UpdateError { name: name.to_string(), error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn run(&self, service: &ServiceConfig, guard: &InFlight<'_>) -> Result<Arc<Snapshot>, Error> {
        let name = service.name.as_str();
        let options = service.http_options.as_ref().ok_or_else(|| {
            Error::Config(ConfigError::Missing {
                field: format!("{name}.http_options"),
                hint: "set http_options.url".into(),
            })
        })?;

        let payload = self
            .fetcher
            .fetch(options)
            .await
            .map_err(|cause| Error::Fetch { source_name: name.to_string(), cause: Box::new(cause) })?;
        let fetched_at = chrono::Utc::now().to_rfc3339();
        tracing::debug!(source = %name, status = payload.status, "fetched");

        guard.enter(RefreshState::Indexing);
        let records = extract_records(payload.body, service.items_path.as_deref())
            .map_err(|reason| Error::Index { source_name: name.to_string(), reason })?;
        let indexes = if service.indexes.is_empty() {
            Indexes::new()
        } else {
            self.indexer.build(name, &records, &service.indexes).await
        };

        guard.enter(RefreshState::Committing);
        let snapshot = Snapshot {
            source_name: name.to_string(),
            records: Arc::new(records),
            headers: payload.headers,
            indexes,
            fetched_at,
        };
        self.store
            .put(name, snapshot)
            .await
            .map_err(|cause| Error::Commit { source_name: name.to_string(), cause: Box::new(cause) })
    }
}
