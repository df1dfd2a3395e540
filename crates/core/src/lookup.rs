//! Read path: records of the current snapshot, optionally through an index.

use std::sync::Arc;

use serde_json::Value;

use crate::Error;
use crate::event::{CacheEvent, EventBus};
use crate::index;
use crate::snapshot::{Records, Snapshot};
use crate::store::TieredStore;

/// What to read from one source.
///
/// `index_value: None` selects the records that lack `index_key`; a JSON
/// `null` selects those whose field is explicitly `null`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub name: String,
    pub index_key: Option<String>,
    pub index_value: Option<Value>,
}

impl Query {
    /// Every record of `name`.
    pub fn all(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Records of `name` whose `field` equals `value`.
    pub fn by(name: impl Into<String>, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), index_key: Some(field.into()), index_value: Some(value.into()) }
    }

    /// Records of `name` without a `field`.
    pub fn undefined(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self { name: name.into(), index_key: Some(field.into()), index_value: None }
    }
}

pub struct Lookup {
    store: Arc<TieredStore<Snapshot>>,
    events: EventBus,
}

impl Lookup {
    pub fn new(store: Arc<TieredStore<Snapshot>>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Run `query` against the committed snapshot of `query.name`.
    ///
    /// # Errors
    ///
    /// `SourceNotFound` when nothing has been committed for the source,
    /// `StorageRead` or `StoreClosed` from the store. Each failure is also
    /// published as `getError`.
    pub async fn get(&self, query: &Query) -> Result<Records, Error> {
        let name = query.name.as_str();
        match self.select(query).await {
            Ok(data) => {
                tracing::debug!(source = %name, index = ?query.index_key, records = data.len(), "lookup");
                self.events
                    .emit(CacheEvent::GetData { name: name.to_string(), data: data.clone() });
                Ok(data)
            }
            Err(e) => {
                tracing::debug!(source = %name, error = %e, "lookup failed");
                self.events
                    .emit(CacheEvent::GetError { name: name.to_string(), error: e.to_string() });
                Err(e)
            }
        }
    }

    /// True when a snapshot is committed for `name`.
    ///
    /// # Errors
    ///
    /// Store failures other than "not found"; these are also published as
    /// `getError`.
    pub async fn exists(&self, name: &str) -> Result<bool, Error> {
        self.store.contains(name).await.inspect_err(|e| {
            self.events
                .emit(CacheEvent::GetError { name: name.to_string(), error: e.to_string() });
        })
    }

    async fn select(&self, query: &Query) -> Result<Records, Error> {
        let snapshot = self.store.get(&query.name).await.map_err(|e| match e {
            Error::NotFound(_) => Error::SourceNotFound(query.name.clone()),
            other => other,
        })?;

        match &query.index_key {
            None => Ok(snapshot.records.clone()),
            Some(field) => Ok(Arc::new(index::find(
                &snapshot.indexes,
                field,
                query.index_value.as_ref(),
                &snapshot.records,
            ))),
        }
    }
}
