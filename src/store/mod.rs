use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;

use crate::event::{Event, StoredEvent};
use crate::metrics::Metrics;

/// Errors returned by an event store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid event: {0}")]
    Invalid(String),

    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Backend(#[from] anyhow::Error),
}

/// Persistent event storage consumed by ingestion and the API.
pub trait EventStore: Send + Sync + 'static {
    /// Name used to label store metrics.
    fn name(&self) -> &str;

    /// Persists an event, returning its assigned id.
    fn add_event(&self, event: Event)
        -> impl Future<Output = Result<String, StoreError>> + Send;
}

/// Events a [`MemoryStore`] retains by default.
pub const DEFAULT_MAX_EVENTS: usize = 100_000;

/// In-process event store.
///
/// A development and test stand-in for a persistent backend: events live
/// only as long as the process. Ids are sequential, so lookups by id are
/// O(1). At most `max_events` are retained; the oldest are evicted first.
pub struct MemoryStore {
    inner: RwLock<Retained>,
    max_events: usize,
}

#[derive(Default)]
struct Retained {
    events: VecDeque<StoredEvent>,
    /// Sequence number of the front event.
    first_seq: u64,
    next_seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::bounded(DEFAULT_MAX_EVENTS)
    }

    /// Creates a store retaining at most `max_events` (minimum 1).
    pub fn bounded(max_events: usize) -> Self {
        Self {
            inner: RwLock::new(Retained {
                first_seq: 1,
                next_seq: 1,
                ..Default::default()
            }),
            max_events: max_events.max(1),
        }
    }

    /// Returns all retained events in insertion order.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.inner.read().events.iter().cloned().collect()
    }

    /// Returns the event with the given id, if still retained.
    pub fn get(&self, id: &str) -> Option<StoredEvent> {
        let seq = u64::from_str_radix(id, 16).ok()?;
        let inner = self.inner.read();
        let index = usize::try_from(seq.checked_sub(inner.first_seq)?).ok()?;

        inner
            .events
            .get(index)
            .filter(|e| e.event_id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn add_event(&self, event: Event) -> Result<String, StoreError> {
        if event.topic_name.is_empty() {
            return Err(StoreError::Invalid("topic_name is required".to_string()));
        }
        if event.dc.is_empty() {
            return Err(StoreError::Invalid("dc is required".to_string()));
        }

        let mut inner = self.inner.write();
        let id = format!("{:016x}", inner.next_seq);
        inner.next_seq += 1;
        inner.events.push_back(StoredEvent {
            event_id: id.clone(),
            event,
        });

        while inner.events.len() > self.max_events {
            inner.events.pop_front();
            inner.first_seq += 1;
        }

        Ok(id)
    }
}

impl<S: EventStore> EventStore for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn add_event(&self, event: Event) -> impl Future<Output = Result<String, StoreError>> + Send {
        (**self).add_event(event)
    }
}

/// Store wrapper that times every call and counts failures.
pub struct InstrumentedStore<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S: EventStore> InstrumentedStore<S> {
    pub fn new(inner: S, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: EventStore> EventStore for InstrumentedStore<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn add_event(&self, event: Event) -> Result<String, StoreError> {
        let start = Instant::now();
        let result = self.inner.add_event(event).await;
        self.metrics.store_method("add_event", start);

        if result.is_err() {
            self.metrics.store_error(self.inner.name(), "write");
        }

        result
    }
}
