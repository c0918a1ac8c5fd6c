use crate::error::IndexError;
use crate::models::{Filter, SearchHit, SearchRequest, FILTERABLE_FIELDS};
use crate::traits::RecordIndex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub const DEFAULT_TOP_K: usize = 20;

pub const ID_COLUMN: &str = "id";
pub const SCORE_COLUMN: &str = "score";

/// Runs a top-k similarity query against one namespace.
///
/// Hits come back in the order the index ranked them.
pub async fn search<I>(
    index: &I,
    namespace: &str,
    query_text: &str,
    top_k: usize,
    filter: Option<&Filter>,
) -> Result<Vec<SearchHit>, IndexError>
where
    I: RecordIndex + Sync,
{
    if query_text.trim().is_empty() {
        return Err(IndexError::Request("query is empty".to_string()));
    }
    if top_k == 0 {
        return Err(IndexError::Request("top_k must be at least 1".to_string()));
    }

    if let Some(filter) = filter {
        let unknown = filter.unknown_fields(&FILTERABLE_FIELDS);
        if !unknown.is_empty() {
            warn!(?unknown, "filter names fields outside the filterable set; they may match nothing");
        }
    }

    let request = SearchRequest {
        text: query_text.to_string(),
        top_k,
        filter: filter.filter(|filter| !filter.is_empty()).cloned(),
        fields: Vec::new(),
    };
    debug!(namespace, top_k, filtered = request.filter.is_some(), "searching index");

    let hits = index.search_records(namespace, &request).await?;
    info!(namespace, hits = hits.len(), "search finished");
    Ok(hits)
}

/// Tabular view of a hit list: one row per hit, `id` and `score` first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl ResultTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|row| row.get(column))
    }

    pub fn find_row(&self, id: &str) -> Option<&Map<String, Value>> {
        self.rows
            .iter()
            .find(|row| row.get(ID_COLUMN).and_then(Value::as_str) == Some(id))
    }
}

/// The hit with `job_id`, or the best-ranked hit when no id is given.
pub fn select_hit<'a>(hits: &'a [SearchHit], job_id: Option<&str>) -> Option<&'a SearchHit> {
    match job_id {
        Some(id) => hits.iter().find(|hit| hit.id == id),
        None => hits.first(),
    }
}

pub fn to_table(hits: &[SearchHit]) -> ResultTable {
    let mut table = ResultTable::default();
    if hits.is_empty() {
        return table;
    }
    table.columns.push(ID_COLUMN.to_string());
    table.columns.push(SCORE_COLUMN.to_string());

    for hit in hits {
        let mut row = Map::new();
        row.insert(ID_COLUMN.to_string(), Value::String(hit.id.clone()));
        row.insert(SCORE_COLUMN.to_string(), Value::from(hit.score));

        for (key, value) in &hit.fields {
            if key == ID_COLUMN || key == SCORE_COLUMN {
                continue;
            }
            if !table.columns.iter().any(|column| column == key) {
                table.columns.push(key.clone());
            }
            row.insert(key.clone(), value.clone());
        }
        table.rows.push(row);
    }

    table
}

/// Builds the query text from a resume and/or free-form keywords.
pub fn compose_query_text(resume: Option<&str>, keywords: Option<&str>) -> Option<String> {
    let resume = resume.filter(|text| !text.trim().is_empty());
    let keywords = keywords.filter(|text| !text.trim().is_empty());

    match (resume, keywords) {
        (Some(resume), Some(keywords)) => Some(format!("Resume: {resume} Query: {keywords}")),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InsertableRecord, LOCATION_FIELD};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves fixture hits, applying the received filter and remembering it.
    #[derive(Default)]
    struct StubIndex {
        fixtures: Vec<SearchHit>,
        received: Mutex<Vec<SearchRequest>>,
    }

    #[async_trait]
    impl RecordIndex for StubIndex {
        async fn upsert_records(
            &self,
            _namespace: &str,
            _records: &[InsertableRecord],
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn search_records(
            &self,
            _namespace: &str,
            request: &SearchRequest,
        ) -> Result<Vec<SearchHit>, IndexError> {
            self.received.lock().unwrap().push(request.clone());
            Ok(self
                .fixtures
                .iter()
                .filter(|hit| {
                    request
                        .filter
                        .as_ref()
                        .map_or(true, |filter| filter.matches(&hit.fields))
                })
                .take(request.top_k)
                .cloned()
                .collect())
        }
    }

    fn hit(id: &str, score: f64, location: &str) -> SearchHit {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!("Data Scientist"));
        fields.insert(LOCATION_FIELD.to_string(), json!(location));
        SearchHit {
            id: id.to_string(),
            score,
            fields,
        }
    }

    fn fixture_index() -> StubIndex {
        StubIndex {
            fixtures: vec![
                hit("1", 0.91, "Sydney"),
                hit("2", 0.88, "Melbourne"),
                hit("3", 0.85, "Sydney"),
                hit("4", 0.80, "Brisbane"),
                hit("5", 0.72, "Sydney"),
            ],
            ..StubIndex::default()
        }
    }

    #[tokio::test]
    async fn search_returns_top_k_in_descending_score_order() {
        let index = fixture_index();
        let hits = search(&index, "jobs", "Data Scientist", 5, None)
            .await
            .expect("search succeeds");

        assert_eq!(hits.len(), 5);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert!(index.received.lock().unwrap()[0].filter.is_none());
    }

    #[tokio::test]
    async fn location_filter_is_sent_and_applied() {
        let index = fixture_index();
        let filter = Filter::new().with_in(LOCATION_FIELD, ["Sydney"]);

        let hits = search(&index, "jobs", "Data Scientist", 10, Some(&filter))
            .await
            .expect("search succeeds");

        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "5"]);
        let received = index.received.lock().unwrap();
        assert_eq!(received[0].filter.as_ref(), Some(&filter));
        assert_eq!(
            received[0].to_body()["query"]["filter"],
            json!({ "metadata.location.name": { "$in": ["Sydney"] } })
        );
    }

    #[tokio::test]
    async fn empty_filter_is_not_sent() {
        let index = fixture_index();
        search(&index, "jobs", "nurse", 3, Some(&Filter::new()))
            .await
            .expect("search succeeds");
        assert!(index.received.lock().unwrap()[0].filter.is_none());
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let index = fixture_index();
        let result = search(&index, "jobs", "   ", 5, None).await;
        assert!(matches!(result, Err(IndexError::Request(_))));
        assert!(index.received.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_hit_list_gives_empty_table() {
        let table = to_table(&[]);
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn hit_without_fields_keeps_id_and_score() {
        let table = to_table(&[SearchHit {
            id: "abc".to_string(),
            score: 0.5,
            fields: Map::new(),
        }]);

        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].len(), 2);
        assert_eq!(table.cell(0, ID_COLUMN), Some(&json!("abc")));
        assert_eq!(table.cell(0, SCORE_COLUMN), Some(&json!(0.5)));
    }

    #[test]
    fn table_columns_are_the_union_of_fields() {
        let mut sparse = hit("2", 0.4, "Perth");
        sparse.fields.insert("metadata.standout.bullet1".to_string(), json!("Remote"));
        sparse.fields.insert("id".to_string(), json!("shadow"));

        let table = to_table(&[hit("1", 0.9, "Sydney"), sparse]);

        assert_eq!(
            table.columns,
            vec!["id", "score", LOCATION_FIELD, "title", "metadata.standout.bullet1"]
        );
        assert_eq!(table.cell(1, ID_COLUMN), Some(&json!("2")));
        assert!(table.find_row("1").is_some_and(|row| row.get("metadata.standout.bullet1").is_none()));
    }

    #[tokio::test]
    async fn unknown_filter_fields_are_still_sent() {
        let index = fixture_index();
        let filter = Filter::new().with_in("metadata.salary.band", ["high"]);

        let hits = search(&index, "jobs", "Data Scientist", 5, Some(&filter))
            .await
            .expect("search succeeds");
        assert!(hits.is_empty());
        assert_eq!(index.received.lock().unwrap()[0].filter.as_ref(), Some(&filter));
    }

    #[test]
    fn selected_hit_is_found_by_id_or_defaults_to_best() {
        let hits = vec![hit("1", 0.9, "Sydney"), hit("7", 0.6, "Perth")];

        assert_eq!(select_hit(&hits, Some("7")).map(|hit| hit.score), Some(0.6));
        assert_eq!(select_hit(&hits, None).map(|hit| hit.id.as_str()), Some("1"));
        assert!(select_hit(&hits, Some("missing")).is_none());
        assert!(select_hit(&[], None).is_none());
    }

    #[test]
    fn query_text_composition() {
        assert_eq!(
            compose_query_text(Some("Python dev"), Some("remote ML")),
            Some("Resume: Python dev Query: remote ML".to_string())
        );
        assert_eq!(compose_query_text(Some("Python dev"), Some("  ")), Some("Python dev".to_string()));
        assert_eq!(compose_query_text(None, Some("nurse")), Some("nurse".to_string()));
        assert_eq!(compose_query_text(None, None), None);
    }
}
