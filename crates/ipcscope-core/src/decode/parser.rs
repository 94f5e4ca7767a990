//! Record parser for demo program output.
//!
//! Tolerant reader: unknown fields are ignored, unknown discriminators are
//! kept as [`RecordKind::Unknown`]. A line that is not a record is not an
//! error for the caller; [`decode_line`] reclassifies it as freeform text.

use serde_json::Value;

use super::types::{DecodedLine, MemorySnapshot, Record, RecordFields, RecordKind};
use crate::error::{Error, Result};

/// Text prefix the shared-memory demo prints before a full snapshot.
const SNAPSHOT_PREFIX: &str = "MEMORY_STATE:";

/// Classify one output line.
pub fn decode_line(line: &str) -> DecodedLine {
    match parse_line(line) {
        Ok(record) => DecodedLine::Structured(record),
        Err(_) => parse_snapshot_line(line)
            .map_or_else(|| DecodedLine::Freeform(line.to_string()), DecodedLine::Structured),
    }
}

/// Strictly parse a line as one self-contained record.
pub fn parse_line(line: &str) -> Result<Record> {
    let raw: Value = serde_json::from_str(line.trim())?;
    parse_value(raw)
}

/// Parse a JSON value into a record.
pub fn parse_value(raw: Value) -> Result<Record> {
    if !raw.is_object() {
        return Err(Error::Decode("Record is not an object".into()));
    }
    let msg_type = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Decode("Missing 'type' field".into()))?;

    let kind = match RecordKind::from_discriminator(msg_type) {
        RecordKind::MemoryState(_) => RecordKind::MemoryState(parse_snapshot(&raw)),
        other => other,
    };
    let fields = parse_fields(&raw);

    Ok(Record { kind, fields, raw })
}

/// Best-effort fallback: `MEMORY_STATE: {...}` carries a snapshot without a
/// `type` field.
fn parse_snapshot_line(line: &str) -> Option<Record> {
    let body = line.trim().strip_prefix(SNAPSHOT_PREFIX)?;
    let raw: Value = serde_json::from_str(body.trim()).ok()?;
    if raw.get("memory").is_none() && raw.get("semaphore").is_none() {
        return None;
    }
    Some(Record {
        kind: RecordKind::MemoryState(parse_snapshot(&raw)),
        fields: parse_fields(&raw),
        raw,
    })
}

fn parse_fields(raw: &Value) -> RecordFields {
    RecordFields {
        message: raw
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        data: raw.get("data").and_then(value_text),
        pid: raw.get("pid").and_then(Value::as_i64),
        client_id: raw.get("client_id").and_then(Value::as_i64),
        component: raw
            .get("component")
            .and_then(|v| v.as_str())
            .map(String::from),
        process: raw
            .get("process")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
    }
}

fn parse_snapshot(raw: &Value) -> MemorySnapshot {
    let memory = raw.get("memory");
    MemorySnapshot {
        counter: memory
            .and_then(|m| m.get("counter"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        last_writer: memory
            .and_then(|m| m.get("last_writer"))
            .and_then(value_text)
            .filter(|w| w != "0"),
        semaphore_available: raw
            .get("semaphore")
            .and_then(|s| s.get("available"))
            .and_then(Value::as_bool),
    }
}

/// Render scalars as text; `null`, arrays and objects are not text payloads.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
