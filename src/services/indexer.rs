//! Index maintenance: documents in, chunks written.
//!
//! Each document moves through chunking, change detection, embedding and one
//! atomic write on its own; a failure stops that document only. Losing the
//! vector store itself stops the whole run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use crate::error::{EmbeddingError, IndexError, VectorStoreError};
use crate::models::{Chunk, Document, FailureKind, IndexReport, SkipReason};
use crate::services::chunker::TextChunker;
use crate::services::embedding::{EmbeddingClient, TaskType};
use crate::services::vector_store::VectorStore;
use crate::utils::retry::{RetryConfig, Retryable, with_retry};

const DEFAULT_CONCURRENCY: usize = 4;

/// Where a single document ended up.
#[derive(Debug)]
enum Outcome {
    Skipped(SkipReason),
    Unchanged { chunks: u64 },
    Written { written: u64, unchanged: u64, pruned: u64 },
    Failed { kind: FailureKind, message: String },
}

pub struct Indexer {
    chunker: TextChunker,
    embedder: EmbeddingClient,
    store: Arc<dyn VectorStore>,
    collection: String,
    dimension: usize,
    concurrency: usize,
    write_retry: RetryConfig,
}

impl Indexer {
    pub fn new(
        chunker: TextChunker,
        embedder: EmbeddingClient,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            collection: collection.into(),
            dimension,
            concurrency: DEFAULT_CONCURRENCY,
            write_retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Bring the collection in line with `documents`.
    ///
    /// Per-document failures land in the report. Only an unreachable store is
    /// returned as an error. Repeated `document_id`s keep their last copy.
    pub async fn reindex(
        &self,
        documents: impl IntoIterator<Item = Document>,
    ) -> Result<IndexReport, IndexError> {
        let start = Instant::now();
        self.store
            .create_collection(&self.collection, self.dimension)
            .await?;

        let mut report = IndexReport::new(&self.collection);
        let (documents, superseded) = latest_copies(documents);
        for document_id in superseded {
            tracing::debug!(document_id = %document_id, "superseded by a later copy");
            report.record_skip(&document_id, SkipReason::Superseded);
        }

        let mut outcomes = std::pin::pin!(
            stream::iter(documents)
                .map(|document| async move {
                    let outcome = self.index_document(&document).await;
                    (document.document_id, outcome)
                })
                .buffer_unordered(self.concurrency)
        );

        while let Some((document_id, outcome)) = outcomes.next().await {
            match outcome? {
                Outcome::Skipped(reason) => {
                    tracing::debug!(document_id = %document_id, %reason, "skipped document");
                    report.record_skip(&document_id, reason);
                }
                Outcome::Unchanged { chunks } => {
                    report.unchanged += 1;
                    report.chunks_unchanged += chunks;
                }
                Outcome::Written {
                    written,
                    unchanged,
                    pruned,
                } => {
                    tracing::debug!(
                        document_id = %document_id,
                        written,
                        unchanged,
                        pruned,
                        "indexed document"
                    );
                    report.indexed += 1;
                    report.chunks_written += written;
                    report.chunks_unchanged += unchanged;
                    report.chunks_pruned += pruned;
                }
                Outcome::Failed { kind, message } => {
                    tracing::warn!(
                        document_id = %document_id,
                        kind = %kind,
                        error = %message,
                        "failed to index document"
                    );
                    report.record_failure(&document_id, kind, message);
                }
            }
        }

        report.sort_details();
        report.duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            collection = %self.collection,
            indexed = report.indexed,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            chunks_written = report.chunks_written,
            chunks_pruned = report.chunks_pruned,
            duration_ms = report.duration_ms,
            "indexing run finished"
        );
        Ok(report)
    }

    async fn index_document(&self, document: &Document) -> Result<Outcome, IndexError> {
        if let Some(reason) = self.chunker.classify(document) {
            return Ok(Outcome::Skipped(reason));
        }
        let chunks = self.chunker.chunk(document);
        if chunks.is_empty() {
            return Ok(Outcome::Skipped(SkipReason::Empty));
        }

        let stored = match self
            .store
            .chunk_fingerprints(&self.collection, &document.document_id)
            .await
        {
            Ok(stored) => stored,
            Err(e) => return store_failure(e),
        };

        let model_id = self.embedder.model_id();
        let current: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let surplus: Vec<String> = stored
            .keys()
            .filter(|id| !current.contains(id.as_str()))
            .cloned()
            .collect();

        let total = chunks.len() as u64;
        let changed: Vec<(Chunk, String)> = chunks
            .into_iter()
            .map(|chunk| {
                let checksum = chunk.fingerprint(model_id);
                (chunk, checksum)
            })
            .filter(|(chunk, checksum)| stored.get(&chunk.chunk_id) != Some(checksum))
            .collect();

        if changed.is_empty() && surplus.is_empty() {
            return Ok(Outcome::Unchanged { chunks: total });
        }
        let unchanged = total - changed.len() as u64;

        let texts: Vec<String> = changed.iter().map(|(c, _)| c.text.clone()).collect();
        let vectors = match self.embedder.embed(&texts, TaskType::RetrievalDocument).await {
            Ok(vectors) => vectors,
            Err(e) => return Ok(embedding_failure(e)),
        };

        let entries: Vec<_> = changed
            .into_iter()
            .zip(vectors)
            .map(|((chunk, checksum), vector)| chunk.into_entry(vector, checksum))
            .collect();

        let result = with_retry(&self.write_retry, || {
            let entries = entries.clone();
            let surplus = &surplus;
            async move {
                self.store
                    .replace_chunks(&self.collection, entries, surplus)
                    .await
            }
        })
        .await
        .into_result();
        let (written, pruned) = match result {
            Ok(counts) => counts,
            Err(e) => return store_failure(e),
        };

        Ok(Outcome::Written {
            written,
            unchanged,
            pruned,
        })
    }

    /// Remove every chunk of one document.
    pub async fn delete_document(&self, document_id: &str) -> Result<u64, IndexError> {
        let removed = self
            .store
            .delete_by_document(&self.collection, document_id)
            .await?;
        tracing::info!(
            collection = %self.collection,
            document_id = %document_id,
            removed,
            "deleted document"
        );
        Ok(removed)
    }

    /// Drop the whole collection. Returns whether it existed.
    pub async fn clear(&self) -> Result<bool, IndexError> {
        let existed = self.store.drop_collection(&self.collection).await?;
        tracing::info!(collection = %self.collection, existed, "cleared collection");
        Ok(existed)
    }
}

fn embedding_failure(error: EmbeddingError) -> Outcome {
    let kind = if error.is_integrity() {
        FailureKind::Integrity
    } else if error.is_retryable() {
        FailureKind::TransientProvider
    } else {
        FailureKind::FatalProvider
    };
    Outcome::Failed {
        kind,
        message: error.to_string(),
    }
}

/// Keep the last copy of each `document_id`, in input order. Returns the
/// kept documents and one id per dropped copy.
fn latest_copies(documents: impl IntoIterator<Item = Document>) -> (Vec<Document>, Vec<String>) {
    let documents: Vec<Document> = documents.into_iter().collect();
    let mut last: HashMap<&str, usize> = HashMap::with_capacity(documents.len());
    for (position, document) in documents.iter().enumerate() {
        last.insert(document.document_id.as_str(), position);
    }
    if last.len() == documents.len() {
        return (documents, Vec::new());
    }

    let keep: HashSet<usize> = last.into_values().collect();
    let mut superseded = Vec::new();
    let kept = documents
        .into_iter()
        .enumerate()
        .filter_map(|(position, document)| {
            if keep.contains(&position) {
                Some(document)
            } else {
                superseded.push(document.document_id);
                None
            }
        })
        .collect();
    (kept, superseded)
}

fn store_failure(error: VectorStoreError) -> Result<Outcome, IndexError> {
    if error.is_unavailable() {
        return Err(IndexError::BackendUnavailable(error));
    }
    let kind = if error.is_integrity() {
        FailureKind::Integrity
    } else {
        FailureKind::Storage
    };
    Ok(Outcome::Failed {
        kind,
        message: error.to_string(),
    })
}
