use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("word document error: {0}")]
    FlowText(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("unsafe path rejected: {0}")]
    UnsafePath(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt metadata row {row}: {details}")]
    Corrupt { row: i64, details: String },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corpus folder rejected: {0}")]
    InvalidFolder(String),

    #[error("no text could be extracted from the documents in {0}")]
    NoContent(PathBuf),

    #[error(
        "clustered index needs at least {required} training vectors for {clusters} clusters, got {samples}"
    )]
    InsufficientData {
        samples: usize,
        required: usize,
        clusters: usize,
    },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index artifact codec error: {0}")]
    Codec(String),

    #[error("artifact holds {vectors} vectors but the metadata store has {chunks} chunks")]
    MetadataMismatch { vectors: usize, chunks: usize },

    #[error("index integrity check failed for {0}; rebuild required")]
    Integrity(PathBuf),

    #[error("another build holds the lock at {0}")]
    BuildInProgress(PathBuf),

    #[error("build cancelled before persisting")]
    Cancelled,

    #[error("manifest serialization error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRejection {
    Empty,
    TooLong { max: usize, actual: usize },
    NotText,
}

impl std::fmt::Display for QueryRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "query is empty"),
            Self::TooLong { max, actual } => {
                write!(f, "query too long ({actual} chars, max {max})")
            }
            Self::NotText => write!(f, "query must be UTF-8 text"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("index not loaded; build the index first")]
    NotReady,

    #[error("invalid query: {0}")]
    InvalidQuery(QueryRejection),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid setting {key}: {details}")]
    Invalid { key: &'static str, details: String },
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
