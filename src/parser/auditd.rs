use serde_json::Value;

use super::kv::parse_key_value_pairs;
use super::EventParser;
use crate::event::Event;
use crate::ingest::decode::RecordFrame;

/// Topic name the auditd parser is registered under.
pub const TOPIC: &str = "auditd";

/// Parser for auditd records.
///
/// The message is a sequence of `key=value` pairs. The acting user comes
/// from `uid`, falling back to `ouid`; the record `type` becomes the single
/// tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditdParser;

impl EventParser for AuditdParser {
    fn decode(&self, frame: &RecordFrame) -> Event {
        let data = parse_key_value_pairs(&frame.message);

        let user = data
            .get("uid")
            .or_else(|| data.get("ouid"))
            .map(value_text)
            .unwrap_or_default();

        let tags = data.get("type").map(value_text).into_iter().collect();

        Event {
            event_time: frame.timestamp,
            topic_name: frame.topic.clone(),
            dc: frame.dc.clone(),
            host: frame.host.clone(),
            tags,
            user,
            data,
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
