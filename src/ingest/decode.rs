//! Record framing for the rsyslog wire format.
//!
//! A read buffer holds one or more newline-terminated lines of the form
//! `<RFC3339>^0<dc>^0<host>^0<topic>^0<message>`. Decoding never fails:
//! short lines are filtered out and unparseable timestamps fall back to the
//! current time.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use tracing::warn;

/// Field separator sentinel between framing fields.
pub const FIELD_SEPARATOR: &str = "^0";

/// Number of framing fields a line must carry to become a frame.
pub const FRAME_FIELDS: usize = 5;

/// Framing fields extracted from one ingested line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFrame {
    /// Unix seconds; decode time when the wire timestamp was invalid.
    pub timestamp: i64,
    pub dc: String,
    pub host: String,
    pub topic: String,
    pub message: String,
}

/// Lazily decodes every valid frame in `buf`, dropping short lines.
///
/// Only the bytes actually read should be passed; the unused tail of a
/// fixed-size read buffer must not be included.
pub fn decode_records(buf: &[u8]) -> impl Iterator<Item = RecordFrame> + '_ {
    decode_lines(buf).flatten()
}

/// Decodes each non-empty line of `buf` in order.
///
/// `None` marks a line with fewer than [`FRAME_FIELDS`] fields, so callers
/// can account for dropped lines.
pub fn decode_lines(buf: &[u8]) -> impl Iterator<Item = Option<RecordFrame>> + '_ {
    raw_lines(buf)
        .filter(|line| !line.is_empty())
        .map(decode_line)
}

/// Splits a buffer into candidate raw records, one per line.
fn raw_lines(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split(|b| *b == b'\n').map(|line| match line {
        [rest @ .., b'\r'] => rest,
        _ => line,
    })
}

/// Decodes a single raw line, returning `None` when it has too few fields.
pub fn decode_line(line: &[u8]) -> Option<RecordFrame> {
    let text: Cow<'_, str> = String::from_utf8_lossy(line);
    let mut parts = text.split(FIELD_SEPARATOR);

    let raw_ts = parts.next()?;
    let dc = parts.next()?;
    let host = parts.next()?;
    let topic = parts.next()?;
    let message = parts.next()?;

    let timestamp = match parse_timestamp(raw_ts) {
        Some(ts) => ts,
        None => {
            warn!(
                timestamp = %raw_ts,
                topic = %topic,
                "error parsing timestamp, using current timestamp",
            );
            Utc::now().timestamp()
        }
    };

    Some(RecordFrame {
        timestamp,
        dc: dc.to_string(),
        host: host.to_string(),
        topic: topic.to_string(),
        message: message.to_string(),
    })
}

/// Parses an RFC3339 timestamp into unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(fields: &[&str]) -> String {
        fields.join(FIELD_SEPARATOR)
    }

    #[test]
    fn test_decode_well_formed_line() {
        let raw = line(&[
            "2017-06-01T12:00:00Z",
            "us-east",
            "host-1",
            "auditd",
            "uid=42 type=PATH",
        ]);
        let frames: Vec<_> = decode_records(raw.as_bytes()).collect();

        assert_eq!(
            frames,
            vec![RecordFrame {
                timestamp: 1_496_318_400,
                dc: "us-east".to_string(),
                host: "host-1".to_string(),
                topic: "auditd".to_string(),
                message: "uid=42 type=PATH".to_string(),
            }]
        );
    }

    #[test]
    fn test_short_lines_dropped() {
        let raw = format!(
            "{}\n{}\n\n{}\n",
            line(&["2017-06-01T12:00:00Z", "dc", "host", "auditd"]),
            line(&["2017-06-01T12:00:00Z", "dc", "host", "auditd", "uid=1"]),
            "no separators at all",
        );
        let frames: Vec<_> = decode_records(raw.as_bytes()).collect();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message, "uid=1");
    }

    #[test]
    fn test_decode_lines_marks_short_lines() {
        let raw = format!(
            "{}\n\n{}\r\n\n",
            line(&["2017-06-01T12:00:00Z", "dc", "host"]),
            line(&["2017-06-01T12:00:00Z", "dc", "host", "auditd", "uid=1"]),
        );
        let lines: Vec<_> = decode_lines(raw.as_bytes()).collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_none());
        assert_eq!(lines[1].as_ref().expect("frame").message, "uid=1");
    }

    #[test]
    fn test_multiple_lines_keep_order() {
        let raw = format!(
            "{}\r\n{}\n",
            line(&["2017-06-01T12:00:00Z", "dc1", "a", "t", "m1"]),
            line(&["2017-06-01T12:00:01Z", "dc2", "b", "t", "m2"]),
        );
        let frames: Vec<_> = decode_records(raw.as_bytes()).collect();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].dc, "dc1");
        assert_eq!(frames[0].message, "m1");
        assert_eq!(frames[1].dc, "dc2");
        assert_eq!(frames[1].timestamp, 1_496_318_401);
    }

    #[test]
    fn test_invalid_timestamp_uses_now() {
        let raw = line(&["not-a-time", "dc", "host", "auditd", "uid=1"]);

        let before = Utc::now().timestamp();
        let frame = decode_line(raw.as_bytes()).expect("frame");
        let after = Utc::now().timestamp();

        assert!(
            frame.timestamp >= before && frame.timestamp <= after,
            "timestamp {} not within [{before}, {after}]",
            frame.timestamp
        );
    }

    #[test]
    fn test_empty_timestamp_uses_now() {
        let raw = line(&["", "dc", "host", "auditd", "uid=1"]);
        let frame = decode_line(raw.as_bytes()).expect("frame");
        assert!(frame.timestamp > 0);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let raw = line(&["2017-06-01T12:00:00Z", "dc", "host", "auditd", "m", "extra"]);
        let frame = decode_line(raw.as_bytes()).expect("frame");
        assert_eq!(frame.message, "m");
    }

    #[test]
    fn test_invalid_utf8_decoded_lossily() {
        let mut raw = line(&["2017-06-01T12:00:00Z", "dc", "host", "auditd", "uid="]).into_bytes();
        raw.push(0xff);

        let frame = decode_line(&raw).expect("frame");
        assert_eq!(frame.message, "uid=\u{fffd}");
    }

    #[test]
    fn test_timestamp_with_offset() {
        assert_eq!(parse_timestamp("2017-06-01T14:00:00+02:00"), Some(1_496_318_400));
        assert_eq!(parse_timestamp("2017-06-01 12:00:00"), None);
    }
}
