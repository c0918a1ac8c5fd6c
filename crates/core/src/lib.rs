pub mod analysis;
pub mod error;
pub mod extractor;
pub mod index_manager;
pub mod listing;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod search;
pub mod stores;
pub mod traits;
pub mod upsert;
pub mod validator;

pub use analysis::{OpenAiConfig, OpenAiFitAnalyser, PromptTemplates};
pub use error::{AnalysisError, IndexError, IngestError, UpsertError};
pub use extractor::{
    extract_resume_text, DocxResumeExtractor, PdfResumeExtractor, PlainTextResumeExtractor,
};
pub use index_manager::{ensure_index, EnsureOptions};
pub use listing::{escape_markdown, JobListing};
pub use models::{
    Filter, IndexDescription, IndexSpec, InsertableRecord, NormalizedRecord, RawRecord,
    SearchHit, SearchRequest, CLASSIFICATION_FIELD, FILTERABLE_FIELDS, LOCATION_FIELD, MISSING,
    PRIMARY_KEY, WORK_TYPE_FIELD,
};
pub use normalizer::{
    build_embed_text, clean_optional_text, clean_text, flatten, load_records,
    load_records_from_reader, normalize, normalize_all, LoadPolicy, LoadReport, SkippedLine,
};
pub use pipeline::{
    ingest_file, prepare_records, IngestionJob, IngestionSummary, PipelineError, PreparedRecords,
};
pub use search::{compose_query_text, search, select_hit, to_table, ResultTable, DEFAULT_TOP_K};
pub use stores::{PineconeClient, PineconeConfig, PineconeIndex};
pub use traits::{FitAnalyser, IndexControl, RecordIndex, ResumeExtractor};
pub use upsert::{
    upsert_records, BackoffPolicy, BatchFailure, BatchOutcome, BatchStatus, UpsertOptions,
    UpsertReport,
};
pub use validator::{validate_records, RejectedRecord, ValidationReport};
