//! Core of snapcache: periodically fetched HTTP JSON sources, cached in
//! memory over SQLite, with secondary indexes for lookups.
//!
//! This crate provides:
//! - [`HttpCache`], the handle tying scheduling, refresh and lookup together
//! - A tiered (memory over SQLite) snapshot store
//! - Index building and lookup over fetched records
//! - Unified error types and layered configuration
//!
//! The HTTP transport is behind the [`Fetcher`] trait; `snapcache-client`
//! provides the reqwest implementation.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod index;
pub mod lookup;
pub mod refresh;
pub mod schedule;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod testing;

pub use cache::HttpCache;
pub use config::{CacheConfig, ConfigError, HttpOptions, ServiceConfig};
pub use error::Error;
pub use event::{CacheEvent, EventBus};
pub use fetch::{FetchedPayload, Fetcher};
pub use index::IndexBuilder;
pub use lookup::Query;
pub use refresh::{RefreshOutcome, RefreshState};
pub use snapshot::{Records, Snapshot};
pub use store::{DurableStore, SqliteStore, TieredStore};
