use crate::models::{
    SearchHit, CLASSIFICATION_FIELD, LOCATION_FIELD, SALARY_FIELD, STANDOUT_FIELDS,
    WORK_TYPE_FIELD,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Display-oriented view of one search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobListing {
    pub id: String,
    pub score: f64,
    pub title: Option<String>,
    pub salary: Option<String>,
    pub location: Option<String>,
    pub work_type: Option<String>,
    pub classification: Option<String>,
    pub bullets: Vec<String>,
    pub content: Option<String>,
}

impl JobListing {
    pub fn from_hit(hit: &SearchHit) -> Self {
        let fields = &hit.fields;
        Self {
            id: hit.id.clone(),
            score: hit.score,
            title: text_field(fields, "title"),
            salary: text_field(fields, SALARY_FIELD),
            location: text_field(fields, LOCATION_FIELD),
            work_type: text_field(fields, WORK_TYPE_FIELD),
            classification: text_field(fields, CLASSIFICATION_FIELD),
            bullets: STANDOUT_FIELDS
                .iter()
                .filter_map(|field| text_field(fields, field))
                .collect(),
            content: text_field(fields, "content"),
        }
    }
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Escapes the characters markdown renderers treat as math or emphasis markers.
pub fn escape_markdown(text: &str) -> String {
    text.replace('$', "\\$")
        .replace('*', "\\*")
        .replace('_', "\\_")
}
