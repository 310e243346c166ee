use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured event handed to the event store.
///
/// Produced by a topic parser from a decoded record frame (or deserialized
/// from an API request body) and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event time in unix seconds.
    pub event_time: i64,
    pub topic_name: String,
    pub dc: String,
    pub host: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user: String,
    /// Decoded message payload, keyed by field name.
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

/// An event as returned by the store, carrying its assigned id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub event_id: String,
    #[serde(flatten)]
    pub event: Event,
}
