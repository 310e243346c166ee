pub mod auditd;
pub mod kv;

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::Event;
use crate::ingest::decode::RecordFrame;

/// Turns a decoded record frame into a structured event for one topic.
pub trait EventParser: Send + Sync {
    fn decode(&self, frame: &RecordFrame) -> Event;
}

impl<F> EventParser for F
where
    F: Fn(&RecordFrame) -> Event + Send + Sync,
{
    fn decode(&self, frame: &RecordFrame) -> Event {
        self(frame)
    }
}

/// Topic-keyed table of event parsers.
///
/// Holds at most one parser per topic. Registering a topic that already has
/// a parser replaces it and returns the displaced one. Lookups of unknown
/// topics return `None`; there is no fallback parser.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn EventParser>>,
}

impl ParserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in parsers registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(auditd::TOPIC, auditd::AuditdParser);
        registry
    }

    /// Registers `parser` for `topic`, returning any parser it replaced.
    pub fn register<P>(&mut self, topic: impl Into<String>, parser: P) -> Option<Arc<dyn EventParser>>
    where
        P: EventParser + 'static,
    {
        self.parsers.insert(topic.into(), Arc::new(parser))
    }

    /// Returns the parser registered for `topic`.
    pub fn lookup(&self, topic: &str) -> Option<&Arc<dyn EventParser>> {
        self.parsers.get(topic)
    }

    /// Registered topic names, sorted.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}
