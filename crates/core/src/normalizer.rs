use crate::error::IngestError;
use crate::models::{
    NormalizedRecord, RawRecord, CLASSIFICATION_FIELD, CLEANED_CONTENT_KEY, EMBED_TEXT_KEY,
    LOCATION_FIELD, METADATA_KEY, MISSING, SALARY_FIELD, WORK_TYPE_FIELD,
};
use regex::Regex;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// What to do with a dataset line that is not a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_number: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub records: Vec<RawRecord>,
    pub skipped_lines: Vec<SkippedLine>,
}

/// Label and source field for each line of the embedding text, in output order.
const EMBED_TEXT_LINES: [(&str, &str); 6] = [
    ("Job Title", "title"),
    ("Classification", CLASSIFICATION_FIELD),
    ("Location", LOCATION_FIELD),
    ("Work Type", WORK_TYPE_FIELD),
    ("Salary", SALARY_FIELD),
    ("Description", CLEANED_CONTENT_KEY),
];

pub fn load_records(path: &Path, policy: LoadPolicy) -> Result<LoadReport, IngestError> {
    let file = File::open(path)?;
    let report = load_records_from_reader(BufReader::new(file), policy)?;
    info!(
        path = %path.display(),
        records = report.records.len(),
        skipped = report.skipped_lines.len(),
        "dataset loaded"
    );
    Ok(report)
}

pub fn load_records_from_reader<R: BufRead>(
    reader: R,
    policy: LoadPolicy,
) -> Result<LoadReport, IngestError> {
    let mut report = LoadReport::default();

    for (index, line) in reader.split(b'\n').enumerate() {
        let line_number = index + 1;
        let bytes = line?;
        let line = bytes.strip_suffix(b"\r").unwrap_or(&bytes);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match parse_line(line) {
            Ok(record) => report.records.push(record),
            Err(reason) => match policy {
                LoadPolicy::Abort => {
                    return Err(IngestError::Parse {
                        line: line_number,
                        reason,
                    })
                }
                LoadPolicy::Skip => {
                    warn!(line = line_number, reason = %reason, "skipping malformed dataset line");
                    report.skipped_lines.push(SkippedLine {
                        line_number,
                        reason,
                    });
                }
            },
        }
    }

    Ok(report)
}

fn parse_line(line: &[u8]) -> Result<RawRecord, String> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(fields)) => Ok(RawRecord(fields)),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(error) => Err(error.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Flattens `metadata` into `metadata.*` keys. Empty strings become null.
pub fn flatten(raw: &RawRecord) -> NormalizedRecord {
    let mut fields = Map::new();

    for (key, value) in &raw.0 {
        fields.insert(key.clone(), value.clone());
        if key == METADATA_KEY {
            if let Value::Object(nested) = value {
                flatten_into(&mut fields, METADATA_KEY, nested);
            }
        }
    }

    for (key, value) in fields.iter_mut() {
        if key != METADATA_KEY && value.as_str().is_some_and(str::is_empty) {
            *value = Value::Null;
        }
    }

    NormalizedRecord(fields)
}

fn flatten_into(target: &mut Map<String, Value>, prefix: &str, nested: &Map<String, Value>) {
    for (key, value) in nested {
        let path = format!("{prefix}.{key}");
        match value {
            Value::Object(inner) => flatten_into(target, &path, inner),
            leaf => {
                target.insert(path, leaf.clone());
            }
        }
    }
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<.*?>").expect("tag pattern is valid"))
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Strips tag-like markup and collapses whitespace.
pub fn clean_text(text: &str) -> String {
    let without_tags = tag_pattern().replace_all(text, " ");
    whitespace_pattern()
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

pub fn clean_optional_text(text: Option<&str>) -> Option<String> {
    text.map(clean_text)
}

/// Six labeled lines; absent components render as [`MISSING`].
pub fn build_embed_text(record: &NormalizedRecord) -> String {
    EMBED_TEXT_LINES
        .iter()
        .map(|(label, field)| format!("{label}: {}", render_component(record.get(field))))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_component(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING.to_string(),
        Some(Value::String(text)) if text.is_empty() => MISSING.to_string(),
        Some(Value::String(text)) => text.replace(['\r', '\n'], " "),
        Some(other) => other.to_string(),
    }
}

pub fn normalize(raw: &RawRecord) -> NormalizedRecord {
    let mut record = flatten(raw);

    let cleaned = clean_optional_text(record.get_str("content"))
        .filter(|text| !text.is_empty())
        .map(Value::String)
        .unwrap_or(Value::Null);
    record.0.insert(CLEANED_CONTENT_KEY.to_string(), cleaned);

    let embed_text = build_embed_text(&record);
    record.0.insert(EMBED_TEXT_KEY.to_string(), Value::String(embed_text));
    record
}

pub fn normalize_all(records: &[RawRecord]) -> Vec<NormalizedRecord> {
    records.iter().map(normalize).collect()
}
