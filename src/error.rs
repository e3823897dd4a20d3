//! Error types for the indexing and query pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding service: {0}")]
    ConnectionError(String),

    #[error("embedding service rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("embedding service error (status {status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("embedding service rejected credentials (status {status})")]
    Unauthorized { status: u16 },

    #[error("embedding service rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding service returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding client misconfigured: {0}")]
    Config(String),

    #[error("embedding timeout")]
    Timeout,
}

impl EmbeddingError {
    /// Response-shape violations that must never be retried or patched up.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            EmbeddingError::CountMismatch { .. } | EmbeddingError::DimensionMismatch { .. }
        )
    }
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_)
            | EmbeddingError::RateLimited { .. }
            | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError { status, .. } => *status >= 500 || *status == 408,
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::Unauthorized { .. }
            | EmbeddingError::Rejected { .. }
            | EmbeddingError::InvalidResponse(_)
            | EmbeddingError::CountMismatch { .. }
            | EmbeddingError::DimensionMismatch { .. }
            | EmbeddingError::Config(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbeddingError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("filter references undefined field: {0}")]
    UnknownFilterField(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

impl VectorStoreError {
    /// Storage or connectivity failures, as opposed to a bad request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            VectorStoreError::ConnectionError(_)
                | VectorStoreError::Storage(_)
                | VectorStoreError::Io(_)
                | VectorStoreError::CollectionError(_)
                | VectorStoreError::UpsertError(_)
                | VectorStoreError::SearchError(_)
                | VectorStoreError::DeleteError(_)
        )
    }

    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            VectorStoreError::DimensionMismatch { .. } | VectorStoreError::InvalidVector(_)
        )
    }
}

impl From<rusqlite::Error> for VectorStoreError {
    fn from(e: rusqlite::Error) -> Self {
        VectorStoreError::Storage(e.to_string())
    }
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            VectorStoreError::ConnectionError(_) => true,
            VectorStoreError::Storage(msg)
            | VectorStoreError::CollectionError(msg)
            | VectorStoreError::UpsertError(msg)
            | VectorStoreError::SearchError(msg)
            | VectorStoreError::DeleteError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("unavailable")
                    || msg_lower.contains("locked")
                    || msg_lower.contains("busy")
            }
            _ => false,
        }
    }
}

/// Errors raised by the corpus relational store.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("corpus store not found: {0}")]
    NotFound(String),

    #[error("corpus filter references undefined field: {0}")]
    UnknownField(String),

    #[error("invalid corpus filter: {0}")]
    InvalidFilter(String),

    #[error("corpus task failed: {0}")]
    Task(String),
}

/// Errors that abort a whole indexing run.
///
/// Per-document failures are reported in the [`IndexReport`](crate::models::IndexReport)
/// instead.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector store unavailable: {0}")]
    BackendUnavailable(VectorStoreError),

    #[error("vector store error: {0}")]
    VectorStore(VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<VectorStoreError> for IndexError {
    fn from(e: VectorStoreError) -> Self {
        if e.is_unavailable() {
            IndexError::BackendUnavailable(e)
        } else {
            IndexError::VectorStore(e)
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors related to reading document files.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error in {path} (line {line}): {source}")]
    JsonParseError {
        path: String,
        line: usize,
        source: serde_json::Error,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("no documents found")]
    NoDocuments,
}

/// Errors related to search operations.
///
/// An empty collection is not an error; it yields an empty response.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("search backend unavailable: {0}")]
    BackendUnavailable(VectorStoreError),

    #[error("vector store error: {0}")]
    VectorStore(VectorStoreError),

    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),
}

impl From<VectorStoreError> for SearchError {
    fn from(e: VectorStoreError) -> Self {
        if e.is_unavailable() {
            SearchError::BackendUnavailable(e)
        } else {
            SearchError::VectorStore(e)
        }
    }
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("import error: {0}")]
    Import(#[from] ImportError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),
}
