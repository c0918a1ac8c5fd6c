use crate::models::{
    InsertableRecord, NormalizedRecord, CLEANED_CONTENT_KEY, METADATA_KEY, PRIMARY_KEY,
};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Longest string value, in characters, that is sent to the ingestion API.
pub const MAX_VALUE_CHARS: usize = 10_000;
pub const TRUNCATION_MARKER: &str = "...";

const SOURCE_ID_KEY: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Zero-based position in the input sequence.
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub records: Vec<InsertableRecord>,
    pub rejected: Vec<RejectedRecord>,
}

impl ValidationReport {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

pub fn validate_records(records: &[NormalizedRecord]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (position, record) in records.iter().enumerate() {
        match validate_record(record) {
            Ok(clean) => report.records.push(clean),
            Err(reason) => {
                warn!(position, reason = %reason, "rejecting record");
                report.rejected.push(RejectedRecord { position, reason });
            }
        }
    }

    info!(
        valid = report.records.len(),
        total = records.len(),
        rejected = report.rejected_count(),
        "records validated"
    );
    report
}

pub fn validate_record(record: &NormalizedRecord) -> Result<InsertableRecord, String> {
    let mut clean = Map::new();

    for (key, value) in record.fields() {
        if key == METADATA_KEY || key == CLEANED_CONTENT_KEY {
            continue;
        }

        if key == SOURCE_ID_KEY {
            clean.insert(PRIMARY_KEY.to_string(), Value::String(primary_key(value)?));
            continue;
        }

        let value = sanitize_value(value);
        if is_blank(&value) {
            continue;
        }
        clean.insert(key.clone(), value);
    }

    if !clean.contains_key(PRIMARY_KEY) {
        return Err(format!("record has no `{SOURCE_ID_KEY}` field"));
    }

    serde_json::to_string(&clean).map_err(|error| format!("not serializable: {error}"))?;
    Ok(InsertableRecord(clean))
}

fn primary_key(value: &Value) -> Result<String, String> {
    let id = match value {
        Value::String(text) => sanitize_string(text),
        Value::Number(number) => number.to_string(),
        Value::Null => return Err(format!("`{SOURCE_ID_KEY}` is null")),
        other => return Err(format!("`{SOURCE_ID_KEY}` is not a scalar: {other}")),
    };

    if id.trim().is_empty() {
        return Err(format!("`{SOURCE_ID_KEY}` is empty"));
    }
    Ok(id)
}

/// Drops NUL bytes, turns line breaks into spaces and caps the length.
pub fn sanitize_string(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|ch| *ch != '\0')
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect();

    match cleaned.char_indices().nth(MAX_VALUE_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &cleaned[..cut]),
        None => cleaned,
    }
}

/// Applies [`sanitize_string`] to every string, including those nested in arrays.
fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(sanitize_string(text)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), sanitize_value(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}
