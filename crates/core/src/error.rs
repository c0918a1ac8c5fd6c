use crate::upsert::UpsertReport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend} (status {status}): {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index request failed: {0}")]
    Request(String),

    #[error("index not available yet: {0}")]
    NotReady(String),
}

impl IndexError {
    /// Rate limiting, server-side failures and transport hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::BackendResponse { status, .. } => *status == 429 || *status >= 500,
            IndexError::Http(error) => error.is_timeout() || error.is_connect(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("invalid upsert options: {0}")]
    InvalidOptions(String),

    #[error("batch {batch_index} (records from offset {offset}) failed: {source}")]
    BatchFailed {
        batch_index: usize,
        offset: usize,
        #[source]
        source: IndexError,
        report: Box<UpsertReport>,
    },
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("model returned empty content")]
    EmptyContent,

    #[error("prompt template error: {0}")]
    Prompt(#[from] std::io::Error),

    #[error("invalid analyser config: {0}")]
    Config(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
