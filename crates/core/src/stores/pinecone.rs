use crate::error::IndexError;
use crate::models::{IndexDescription, IndexSpec, InsertableRecord, SearchHit, SearchRequest};
use crate::traits::{IndexControl, RecordIndex};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
pub const PINECONE_API_VERSION: &str = "2025-01";

const BACKEND: &str = "pinecone";

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub control_url: String,
    pub api_version: String,
    pub request_timeout: Duration,
}

impl PineconeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            control_url: DEFAULT_CONTROL_URL.to_string(),
            api_version: PINECONE_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Control-plane client; [`IndexControl::connect`] hands out data-plane handles.
#[derive(Clone)]
pub struct PineconeClient {
    client: Client,
    control_url: Url,
}

impl PineconeClient {
    pub fn new(config: &PineconeConfig) -> Result<Self, IndexError> {
        if config.api_key.trim().is_empty() {
            return Err(IndexError::Request("missing Pinecone API key".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(config.api_key.trim())
                .map_err(|_| IndexError::Request("invalid Pinecone API key".to_string()))?,
        );
        headers.insert(
            "x-pinecone-api-version",
            HeaderValue::from_str(&config.api_version)
                .map_err(|_| IndexError::Request("invalid Pinecone API version".to_string()))?,
        );

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            control_url: base_url(&config.control_url)?,
        })
    }

    fn index_url(&self, name: &str) -> Result<Url, IndexError> {
        append_segments(&self.control_url, &["indexes", name])
    }

    async fn fetch_description(&self, name: &str) -> Result<Option<IndexDescription>, IndexError> {
        let response = self.client.get(self.index_url(name)?).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: DescribeIndexResponse = response.json().await?;
        Ok(Some(parsed.into_description(name)))
    }
}

#[async_trait]
impl IndexControl for PineconeClient {
    type Index = PineconeIndex;

    async fn has_index(&self, name: &str) -> Result<bool, IndexError> {
        Ok(self.fetch_description(name).await?.is_some())
    }

    async fn create_index_for_model(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let response = self
            .client
            .post(append_segments(&self.control_url, &["indexes", "create-for-model"])?)
            .json(&create_index_body(spec))
            .send()
            .await?;

        // Another caller created it first.
        if response.status() == StatusCode::CONFLICT {
            debug!(index = %spec.name, "index already exists");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        Ok(())
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription, IndexError> {
        self.fetch_description(name)
            .await?
            .ok_or_else(|| IndexError::NotReady(format!("index {name} does not exist")))
    }

    fn connect(&self, description: &IndexDescription) -> Result<PineconeIndex, IndexError> {
        Ok(PineconeIndex {
            client: self.client.clone(),
            name: description.name.clone(),
            base: data_plane_url(&description.host)?,
        })
    }
}

/// Handle to one index's data plane. Cheap to clone; safe to reuse sequentially.
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    name: String,
    base: Url,
}

impl PineconeIndex {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn namespace_url(&self, namespace: &str, action: &str) -> Result<Url, IndexError> {
        append_segments(&self.base, &["records", "namespaces", namespace, action])
    }
}

#[async_trait]
impl RecordIndex for PineconeIndex {
    async fn upsert_records(
        &self,
        namespace: &str,
        records: &[InsertableRecord],
    ) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.namespace_url(namespace, "upsert")?)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(ndjson_body(records)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        Ok(())
    }

    async fn search_records(
        &self,
        namespace: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let response = self
            .client
            .post(self.namespace_url(namespace, "search")?)
            .json(&request.to_body())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.result.hits)
    }
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

impl DescribeIndexResponse {
    fn into_description(self, requested: &str) -> IndexDescription {
        IndexDescription {
            name: self.name.unwrap_or_else(|| requested.to_string()),
            ready: self.status.is_some_and(|status| status.ready) && !self.host.is_empty(),
            host: self.host,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

fn create_index_body(spec: &IndexSpec) -> serde_json::Value {
    json!({
        "name": spec.name,
        "cloud": spec.cloud,
        "region": spec.region,
        "embed": {
            "model": spec.embed_model,
            "field_map": spec.field_map,
        },
    })
}

fn ndjson_body(records: &[InsertableRecord]) -> Result<String, IndexError> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, serde_json::Error>>()?;
    Ok(lines.join("\n") + "\n")
}

fn base_url(raw: &str) -> Result<Url, IndexError> {
    Ok(Url::parse(raw.trim())?)
}

/// Index hosts are reported without a scheme; local emulators include one.
fn data_plane_url(host: &str) -> Result<Url, IndexError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(IndexError::NotReady("index has no host yet".to_string()));
    }
    if host.contains("://") {
        base_url(host)
    } else {
        base_url(&format!("https://{host}"))
    }
}

fn append_segments(base: &Url, segments: &[&str]) -> Result<Url, IndexError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| IndexError::Request(format!("{base} cannot be used as a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn backend_error(response: Response) -> IndexError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    IndexError::BackendResponse {
        backend: BACKEND.to_string(),
        status: status.as_u16(),
        details: if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PRIMARY_KEY;
    use serde_json::{Map, Value};

    fn record(id: &str, title: &str) -> InsertableRecord {
        let mut fields = Map::new();
        fields.insert(PRIMARY_KEY.to_string(), json!(id));
        fields.insert("title".to_string(), json!(title));
        InsertableRecord(fields)
    }

    #[test]
    fn ndjson_body_has_one_record_per_line() -> Result<(), Box<dyn std::error::Error>> {
        let body = ndjson_body(&[record("1", "A"), record("2", "B")])?;
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(body.ends_with('\n'));
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(second["_id"], json!("2"));
        Ok(())
    }

    #[test]
    fn create_body_carries_model_and_field_map() {
        let body = create_index_body(&IndexSpec::new("seek-ads"));
        assert_eq!(
            body,
            json!({
                "name": "seek-ads",
                "cloud": "aws",
                "region": "us-east-1",
                "embed": { "model": "llama-text-embed-v2", "field_map": { "text": "embed_text" } }
            })
        );
    }

    #[test]
    fn data_plane_urls_are_built_from_host() -> Result<(), Box<dyn std::error::Error>> {
        let hosted = data_plane_url("seek-ads-abc123.svc.aped-4627-b74a.pinecone.io")?;
        assert_eq!(
            append_segments(&hosted, &["records", "namespaces", "jobs ns", "search"])?.as_str(),
            "https://seek-ads-abc123.svc.aped-4627-b74a.pinecone.io/records/namespaces/jobs%20ns/search"
        );

        let local = data_plane_url("http://localhost:5081")?;
        assert_eq!(local.scheme(), "http");
        assert!(data_plane_url("  ").is_err());
        Ok(())
    }

    #[test]
    fn control_urls_keep_base_path() -> Result<(), Box<dyn std::error::Error>> {
        let base = base_url("https://api.pinecone.io/")?;
        assert_eq!(
            append_segments(&base, &["indexes", "seek-ads"])?.as_str(),
            "https://api.pinecone.io/indexes/seek-ads"
        );
        let proxied = base_url("http://proxy.local/pinecone")?;
        assert_eq!(
            append_segments(&proxied, &["indexes", "create-for-model"])?.as_str(),
            "http://proxy.local/pinecone/indexes/create-for-model"
        );
        Ok(())
    }

    #[test]
    fn describe_response_requires_ready_status_and_host() -> Result<(), Box<dyn std::error::Error>> {
        let ready: DescribeIndexResponse = serde_json::from_value(json!({
            "name": "seek-ads",
            "host": "seek-ads-1.svc.pinecone.io",
            "status": { "ready": true, "state": "Ready" }
        }))?;
        let pending: DescribeIndexResponse = serde_json::from_value(json!({
            "status": { "ready": false, "state": "Initializing" }
        }))?;

        assert!(ready.into_description("seek-ads").ready);
        let pending = pending.into_description("seek-ads");
        assert!(!pending.ready);
        assert_eq!(pending.name, "seek-ads");
        Ok(())
    }

    #[test]
    fn search_response_hits_keep_order_and_fields() -> Result<(), Box<dyn std::error::Error>> {
        let parsed: SearchResponse = serde_json::from_value(json!({
            "result": {
                "hits": [
                    { "_id": "a", "_score": 0.9, "fields": { "title": "Data Scientist" } },
                    { "_id": "b", "_score": 0.4 }
                ]
            },
            "usage": { "read_units": 6 }
        }))?;

        let hits = parsed.result.hits;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].fields["title"], json!("Data Scientist"));
        assert!(hits[1].fields.is_empty());
        Ok(())
    }

    #[test]
    fn client_requires_api_key() {
        let result = PineconeClient::new(&PineconeConfig::new("   "));
        assert!(matches!(result, Err(IndexError::Request(_))));
    }
}
