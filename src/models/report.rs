//! Outcome of an indexing run.

use serde::{Deserialize, Serialize};

/// Why a document produced no chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `doc_type` is outside the configured indexable set.
    NotIndexable,
    /// Binary payload.
    Binary,
    /// Empty or whitespace-only text.
    Empty,
    /// A later document in the same run has the same `document_id`.
    Superseded,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotIndexable => write!(f, "not an indexable type"),
            SkipReason::Binary => write!(f, "binary content"),
            SkipReason::Empty => write!(f, "empty content"),
            SkipReason::Superseded => write!(f, "superseded by a later copy"),
        }
    }
}

/// Error class of a failed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Embedding service kept failing with retryable errors.
    TransientProvider,
    /// Embedding service rejected the request.
    FatalProvider,
    /// Response or write violated a shape invariant; nothing was written.
    Integrity,
    /// Vector store refused the write.
    Storage,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::TransientProvider => write!(f, "transient provider error"),
            FailureKind::FatalProvider => write!(f, "fatal provider error"),
            FailureKind::Integrity => write!(f, "integrity error"),
            FailureKind::Storage => write!(f, "storage error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub document_id: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub document_id: String,
    pub reason: SkipReason,
}

/// Per-run counters. Always returned, even when some documents failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub collection: String,
    pub indexed: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub chunks_written: u64,
    pub chunks_unchanged: u64,
    pub chunks_pruned: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_documents: Vec<SkippedDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DocumentFailure>,
}

impl IndexReport {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Number of documents seen by the run.
    pub fn total(&self) -> u64 {
        self.indexed + self.unchanged + self.skipped + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn record_skip(&mut self, document_id: &str, reason: SkipReason) {
        self.skipped += 1;
        self.skipped_documents.push(SkippedDocument {
            document_id: document_id.to_string(),
            reason,
        });
    }

    pub fn record_failure(&mut self, document_id: &str, kind: FailureKind, message: String) {
        self.failed += 1;
        self.failures.push(DocumentFailure {
            document_id: document_id.to_string(),
            kind,
            message,
        });
    }

    /// Stable ordering for output; completion order depends on scheduling.
    pub fn sort_details(&mut self) {
        self.failures
            .sort_by(|a, b| a.document_id.cmp(&b.document_id));
        self.skipped_documents
            .sort_by(|a, b| a.document_id.cmp(&b.document_id));
    }
}
