//! Parsing of sensor payloads into raw records.
//!
//! Sensors post either a JSON array of readings or a single reading; files
//! collected on disk are usually JSON Lines. All three shapes are accepted.
//! Fields beyond the four the pipeline uses are ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::types::RawRecord;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload contains no readings")]
    Empty,

    #[error("payload is not a JSON object, array of objects, or JSON Lines: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct SensorPayload {
    #[serde(default)]
    sensor_id: Option<String>,
    #[serde(default)]
    sensor_set_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    light_intensity: Option<f64>,
}

/// An item that could not become a raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedItem {
    /// Zero-based position in the payload (array index or line number).
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedPayload {
    pub records: Vec<RawRecord>,
    pub skipped: Vec<SkippedItem>,
}

pub fn parse_payload(content: &str) -> Result<ParsedPayload, PayloadError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(PayloadError::Empty);
    }

    let mut parsed = ParsedPayload::default();
    let items: Vec<(usize, Value)> = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.into_iter().enumerate().collect(),
        Ok(item @ Value::Object(_)) => vec![(0, item)],
        Ok(other) => {
            return Err(PayloadError::Invalid(format!(
                "expected an object or array, found {}",
                json_kind(&other)
            )))
        }
        Err(whole_err) => {
            let mut items = Vec::new();
            for (line_no, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(item) => items.push((line_no, item)),
                    Err(e) => skip(&mut parsed, line_no, format!("invalid JSON: {e}")),
                }
            }
            if items.is_empty() {
                return Err(PayloadError::Invalid(whole_err.to_string()));
            }
            items
        }
    };

    if items.is_empty() {
        return Err(PayloadError::Empty);
    }

    for (index, item) in items {
        match to_record(item) {
            Ok(record) => parsed.records.push(record),
            Err(reason) => skip(&mut parsed, index, reason),
        }
    }
    Ok(parsed)
}

fn to_record(item: Value) -> Result<RawRecord, String> {
    if !item.is_object() {
        return Err(format!("expected an object, found {}", json_kind(&item)));
    }
    let payload: SensorPayload =
        serde_json::from_value(item).map_err(|e| format!("invalid reading: {e}"))?;
    let raw_ts = payload
        .timestamp
        .ok_or_else(|| "missing timestamp".to_string())?;
    let timestamp = DateTime::parse_from_rfc3339(raw_ts.trim())
        .map_err(|e| format!("unparseable timestamp {raw_ts:?}: {e}"))?
        .with_timezone(&Utc);
    Ok(RawRecord {
        sensor_id: payload.sensor_id,
        sensor_set_id: payload.sensor_set_id,
        timestamp,
        light_intensity: payload.light_intensity,
    })
}

fn skip(parsed: &mut ParsedPayload, index: usize, reason: String) {
    warn!(index, %reason, "Skipping payload item");
    parsed.skipped.push(SkippedItem { index, reason });
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
