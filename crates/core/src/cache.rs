//! The cache handle.
//!
//! [`HttpCache`] owns one durable store, one event bus and one scheduler.
//! Nothing is global; every instance is independent of the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::Error;
use crate::config::{CacheConfig, ConfigError, ServiceConfig};
use crate::event::{CacheEvent, EventBus};
use crate::fetch::Fetcher;
use crate::index::IndexBuilder;
use crate::lookup::{Lookup, Query};
use crate::refresh::{RefreshOutcome, RefreshState, Refresher};
use crate::schedule::{CronSchedule, Scheduler, parse_timezone};
use crate::snapshot::{Records, Snapshot};
use crate::store::{DurableStore, SqliteStore, TieredStore};

pub struct HttpCache {
    config: Arc<CacheConfig>,
    store: Arc<TieredStore<Snapshot>>,
    refresher: Arc<Refresher>,
    lookup: Lookup,
    events: EventBus,
    scheduler: Scheduler,
    started: AtomicBool,
}

impl HttpCache {
    /// Validate `config` and open the SQLite store under `config.location`.
    ///
    /// # Errors
    ///
    /// `Config` for an invalid configuration, `Database` if the store file
    /// cannot be opened.
    pub async fn open(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, Error> {
        config.validate()?;
        let durable = SqliteStore::open_in_dir(&config.location).await?;
        Self::with_store(config, fetcher, Arc::new(durable))
    }

    /// Build a cache over an already opened durable store.
    pub fn with_store(
        config: CacheConfig, fetcher: Arc<dyn Fetcher>, durable: Arc<dyn DurableStore>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let store = Arc::new(TieredStore::new(durable));
        let events = EventBus::default();
        let refresher = Arc::new(Refresher::new(
            store.clone(),
            fetcher,
            IndexBuilder::new(config.index_batch_size),
            events.clone(),
        ));
        let lookup = Lookup::new(store.clone(), events.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            refresher,
            lookup,
            events,
            scheduler: Scheduler::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Bootstrap and schedule every configured service.
    ///
    /// A service without a readable snapshot is refreshed right away; one
    /// that already has a snapshot waits for its first scheduled tick.
    /// Once `start` has succeeded, calling it again is a no-op; a failed
    /// start can be retried.
    ///
    /// # Errors
    ///
    /// `Config` if a cron expression or timezone fails to parse, or a store
    /// error from the preload.
    pub async fn start(&self) -> Result<(), Error> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("cache already started");
            return Ok(());
        }

        let launched = self.launch().await;
        if let Err(e) = &launched {
            tracing::error!(error = %e, "cache failed to start");
            self.started.store(false, Ordering::Release);
        }
        launched
    }

    /// Parse every schedule before touching the store, so a failure leaves
    /// nothing bootstrapped or scheduled.
    async fn launch(&self) -> Result<(), Error> {
        let mut plans = Vec::with_capacity(self.config.services.len());
        for (i, service) in self.config.services.iter().enumerate() {
            let schedule = CronSchedule::parse(&service.cron_expression).map_err(|reason| {
                ConfigError::Invalid { field: format!("services[{i}].cron_expression"), reason }
            })?;
            let tz = parse_timezone(service.effective_timezone(&self.config))
                .map_err(|reason| ConfigError::Invalid { field: format!("services[{i}].timezone"), reason })?;
            plans.push((Arc::new(service.clone()), schedule, tz));
        }

        if self.config.preload {
            self.store.preload().await?;
        }

        for (service, schedule, tz) in plans {
            self.bootstrap(&service).await;

            let refresher = self.refresher.clone();
            let ticked = service.clone();
            let name = service.name.clone();
            self.scheduler.schedule(
                &service.name,
                schedule,
                tz,
                move || {
                    let refresher = refresher.clone();
                    let service = ticked.clone();
                    async move {
                        tokio::spawn(update_service(refresher, service));
                    }
                },
                move || service_updated(&name),
            );
        }

        tracing::info!(services = self.config.services.len(), "cache started");
        Ok(())
    }

    async fn bootstrap(&self, service: &Arc<ServiceConfig>) {
        match self.store.get(&service.name).await {
            Ok(snapshot) => {
                tracing::debug!(
                    source = %service.name,
                    records = snapshot.len(),
                    fetched_at = %snapshot.fetched_at,
                    "snapshot present; waiting for schedule"
                );
            }
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!(source = %service.name, error = %e, "stored snapshot unreadable; refreshing");
                }
                tokio::spawn(update_service(self.refresher.clone(), service.clone()));
            }
        }
    }

    /// Records of the current snapshot selected by `query`.
    ///
    /// # Errors
    ///
    /// `SourceNotFound` when nothing is committed for the source yet, or a
    /// store error.
    pub async fn get(&self, query: &Query) -> Result<Records, Error> {
        self.lookup.get(query).await
    }

    pub async fn exists(&self, name: &str) -> Result<bool, Error> {
        self.lookup.exists(name).await
    }

    /// Refresh `name` now, outside its schedule.
    ///
    /// Goes through the same in-flight guard as scheduled ticks, so it
    /// returns `Skipped` while another refresh of the source is running.
    pub async fn refresh(&self, name: &str) -> Result<RefreshOutcome, Error> {
        let service = self
            .config
            .service(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))?;
        self.refresher.refresh(service).await
    }

    pub fn refresh_state(&self, name: &str) -> RefreshState {
        self.refresher.state(name)
    }

    /// Configured service names, in configuration order.
    pub fn source_names(&self) -> Vec<String> {
        self.config.services.iter().map(|s| s.name.clone()).collect()
    }

    /// Stop every schedule and close the store.
    ///
    /// Refreshes already running are not aborted; they finish or fail on
    /// their own. Idempotent.
    pub async fn stop(&self) -> Result<(), Error> {
        let stopped = self.scheduler.stop().await;
        tracing::info!(services = stopped.len(), "schedules stopped");
        self.store.close().await
    }
}

async fn update_service(refresher: Arc<Refresher>, service: Arc<ServiceConfig>) {
    // Failures are already logged and published as `updateError`.
    let _ = refresher.refresh(&service).await;
}

fn service_updated(name: &str) {
    tracing::info!(source = %name, "service schedule finished");
}
