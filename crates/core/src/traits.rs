use crate::error::{AnalysisError, IndexError, IngestError};
use crate::models::{IndexDescription, IndexSpec, InsertableRecord, SearchHit, SearchRequest};
use async_trait::async_trait;
use std::path::Path;

/// Control plane of a hosted index service.
#[async_trait]
pub trait IndexControl {
    type Index: RecordIndex + Send + Sync;

    async fn has_index(&self, name: &str) -> Result<bool, IndexError>;

    async fn create_index_for_model(&self, spec: &IndexSpec) -> Result<(), IndexError>;

    async fn describe_index(&self, name: &str) -> Result<IndexDescription, IndexError>;

    fn connect(&self, description: &IndexDescription) -> Result<Self::Index, IndexError>;
}

/// Data plane of one index: integrated-embedding record upsert and text search.
#[async_trait]
pub trait RecordIndex {
    async fn upsert_records(
        &self,
        namespace: &str,
        records: &[InsertableRecord],
    ) -> Result<(), IndexError>;

    async fn search_records(
        &self,
        namespace: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>, IndexError>;
}

pub trait ResumeExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError>;
}

#[async_trait]
pub trait FitAnalyser {
    async fn analyse(&self, resume_text: &str, job_description: &str) -> Result<String, AnalysisError>;
}
