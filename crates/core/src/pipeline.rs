use crate::error::{IndexError, IngestError, UpsertError};
use crate::index_manager::{ensure_index, EnsureOptions};
use crate::models::{IndexSpec, InsertableRecord};
use crate::normalizer::{load_records, normalize_all, LoadPolicy, SkippedLine};
use crate::traits::IndexControl;
use crate::upsert::{upsert_records, UpsertOptions, UpsertReport};
use crate::validator::{validate_records, RejectedRecord};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Dataset records after loading, normalizing and validating.
#[derive(Debug, Clone, Default)]
pub struct PreparedRecords {
    pub records: Vec<InsertableRecord>,
    pub skipped_lines: Vec<SkippedLine>,
    pub rejected: Vec<RejectedRecord>,
}

pub fn prepare_records(path: &Path, policy: LoadPolicy) -> Result<PreparedRecords, IngestError> {
    let loaded = load_records(path, policy)?;
    let normalized = normalize_all(&loaded.records);
    let validated = validate_records(&normalized);

    Ok(PreparedRecords {
        records: validated.records,
        skipped_lines: loaded.skipped_lines,
        rejected: validated.rejected,
    })
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Upsert(#[from] UpsertError),
}

#[derive(Debug)]
pub struct IngestionSummary {
    pub skipped_lines: Vec<SkippedLine>,
    pub rejected: Vec<RejectedRecord>,
    pub upsert: UpsertReport,
}

pub struct IngestionJob<'a> {
    pub source: &'a Path,
    pub load_policy: LoadPolicy,
    pub index: &'a IndexSpec,
    pub ensure: EnsureOptions,
    pub namespace: &'a str,
    pub upsert: UpsertOptions,
}

/// Prepares the dataset, makes sure the index exists, then batch-loads the records.
pub async fn ingest_file<C>(control: &C, job: &IngestionJob<'_>) -> Result<IngestionSummary, PipelineError>
where
    C: IndexControl + Sync,
{
    let prepared = prepare_records(job.source, job.load_policy)?;
    info!(
        source = %job.source.display(),
        valid = prepared.records.len(),
        skipped_lines = prepared.skipped_lines.len(),
        rejected = prepared.rejected.len(),
        "dataset prepared"
    );

    let index = ensure_index(control, job.index, &job.ensure).await?;
    let upsert = upsert_records(&index, job.namespace, &prepared.records, &job.upsert).await?;

    Ok(IngestionSummary {
        skipped_lines: prepared.skipped_lines,
        rejected: prepared.rejected,
        upsert,
    })
}
