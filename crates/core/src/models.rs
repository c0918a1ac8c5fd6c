use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Textual stand-in for a value the source record does not carry.
pub const MISSING: &str = "N/A";

/// Primary-key field name required by the ingestion API.
pub const PRIMARY_KEY: &str = "_id";

pub const METADATA_KEY: &str = "metadata";
pub const CLEANED_CONTENT_KEY: &str = "cleaned_content";
pub const EMBED_TEXT_KEY: &str = "embed_text";

pub const LOCATION_FIELD: &str = "metadata.location.name";
pub const WORK_TYPE_FIELD: &str = "metadata.workType.name";
pub const CLASSIFICATION_FIELD: &str = "metadata.classification.name";
pub const SALARY_FIELD: &str = "metadata.additionalSalaryText";
pub const STANDOUT_FIELDS: [&str; 3] = [
    "metadata.standout.bullet1",
    "metadata.standout.bullet2",
    "metadata.standout.bullet3",
];

/// One job advertisement exactly as it appears on a dataset line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get("id")
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get(METADATA_KEY).and_then(Value::as_object)
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// A record with `metadata.*` flattened and the helper text fields added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct NormalizedRecord(pub Map<String, Value>);

impl NormalizedRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn embed_text(&self) -> Option<&str> {
        self.get_str(EMBED_TEXT_KEY)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// A record ready for the ingestion API: keyed by `_id`, no nulls, no empty strings.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(transparent)]
pub struct InsertableRecord(pub(crate) Map<String, Value>);

impl InsertableRecord {
    pub fn id(&self) -> &str {
        self.0
            .get(PRIMARY_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: f64,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Conjunction of in-set constraints over flattened field names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Filter {
    constraints: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an in-set constraint. An empty value set leaves the field unconstrained.
    pub fn with_in<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if !values.is_empty() {
            self.constraints.insert(field.into(), values);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn constraints(&self) -> &BTreeMap<String, Vec<String>> {
        &self.constraints
    }

    /// Field names that are not part of `schema`; such keys can never match.
    pub fn unknown_fields<'a>(&'a self, schema: &[&str]) -> Vec<&'a str> {
        self.constraints
            .keys()
            .map(String::as_str)
            .filter(|field| !schema.contains(field))
            .collect()
    }

    /// Whether a field map satisfies every constraint.
    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        self.constraints.iter().all(|(field, accepted)| {
            fields
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|value| accepted.iter().any(|candidate| candidate == value))
        })
    }

    pub fn to_json(&self) -> Value {
        let clauses: Map<String, Value> = self
            .constraints
            .iter()
            .map(|(field, values)| (field.clone(), json!({ "$in": values })))
            .collect();
        Value::Object(clauses)
    }
}

/// Fields that the index keeps and the search layer knows how to filter on.
pub const FILTERABLE_FIELDS: [&str; 3] = [LOCATION_FIELD, WORK_TYPE_FIELD, CLASSIFICATION_FIELD];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub cloud: String,
    pub region: String,
    pub embed_model: String,
    pub field_map: BTreeMap<String, String>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            embed_model: "llama-text-embed-v2".to_string(),
            field_map: BTreeMap::from([("text".to_string(), EMBED_TEXT_KEY.to_string())]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub host: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub text: String,
    pub top_k: usize,
    pub filter: Option<Filter>,
    pub fields: Vec<String>,
}

impl SearchRequest {
    pub fn to_body(&self) -> Value {
        let mut query = json!({
            "top_k": self.top_k,
            "inputs": { "text": self.text },
        });
        if let Some(filter) = self.filter.as_ref().filter(|filter| !filter.is_empty()) {
            query["filter"] = filter.to_json();
        }

        let mut body = json!({ "query": query });
        if !self.fields.is_empty() {
            body["fields"] = json!(self.fields);
        }
        body
    }
}
