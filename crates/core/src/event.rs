//! Cache lifecycle notifications.
//!
//! Events go out on a bounded `tokio::sync::broadcast` channel. Delivery is
//! best-effort: with no subscriber the event is dropped, and a subscriber
//! that falls behind sees `RecvError::Lagged`.

use tokio::sync::broadcast;

use crate::snapshot::Records;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A refresh committed a new snapshot.
    UpdateData { name: String, data: Records },
    /// A refresh attempt failed; the previous snapshot stays visible.
    UpdateError { name: String, error: String },
    /// A lookup succeeded.
    GetData { name: String, data: Records },
    /// A lookup or existence check failed.
    GetError { name: String, error: String },
}

impl CacheEvent {
    /// Source the event concerns.
    pub fn name(&self) -> &str {
        match self {
            CacheEvent::UpdateData { name, .. }
            | CacheEvent::UpdateError { name, .. }
            | CacheEvent::GetData { name, .. }
            | CacheEvent::GetError { name, .. } => name,
        }
    }

    /// Event kind as used in logs: `updateData`, `updateError`, `getData`, `getError`.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::UpdateData { .. } => "updateData",
            CacheEvent::UpdateError { .. } => "updateError",
            CacheEvent::GetData { .. } => "getData",
            CacheEvent::GetError { .. } => "getError",
        }
    }
}

/// Fan-out point for [`CacheEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; an event nobody listens to is dropped.
    pub fn emit(&self, event: CacheEvent) {
        tracing::trace!(kind = event.kind(), source = %event.name(), "event");
        let _ = self.tx.send(event);
    }
}
