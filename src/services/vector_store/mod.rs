//! Vector store abstraction layer.
//!
//! This module provides a trait-based abstraction over different vector store backends
//! (embedded SQLite, Qdrant) allowing seamless switching based on configuration.
//! Every backend reports scores as [`Similarity`] and ranks hits the same way.

mod local;
mod qdrant;

pub use local::LocalVectorStore;
pub use qdrant::QdrantBackend;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::error::VectorStoreError;
use crate::models::{
    DistanceMetric, IndexEntry, MetadataFilter, ScoredChunk, Similarity, VectorDriver,
    VectorStoreConfig,
};

/// Columns every collection can be filtered on without registering them.
pub const BUILTIN_FIELDS: [&str; 3] = ["document_id", "chunk_index", "chunk_id"];

static COLLECTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("collection name pattern is valid")
});

/// Collection/table information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub points_count: u64,
}

/// Nearest-neighbour request against one collection.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter: Option<MetadataFilter>,
    pub min_similarity: Option<Similarity>,
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            filter: None,
            min_similarity: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<MetadataFilter>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_min_similarity(mut self, threshold: Option<Similarity>) -> Self {
        self.min_similarity = threshold;
        self
    }
}

/// Abstract trait for vector store operations.
///
/// Collections are named per call so one backend instance can serve any number
/// of independent collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if the vector store is healthy and accessible.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Create the collection if it doesn't exist. The dimension is fixed at
    /// creation; asking again with another dimension is an error.
    async fn create_collection(&self, name: &str, dimension: usize)
    -> Result<(), VectorStoreError>;

    /// Remove a collection and everything in it. Returns whether it existed.
    async fn drop_collection(&self, name: &str) -> Result<bool, VectorStoreError>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, VectorStoreError>;

    /// Returns None if the collection doesn't exist.
    async fn collection_info(&self, name: &str)
    -> Result<Option<CollectionInfo>, VectorStoreError>;

    /// Insert or replace entries as one atomic batch.
    ///
    /// Returns the number of rows that were new or changed. A batch containing
    /// any vector of the wrong dimension is rejected without writing anything.
    async fn upsert(&self, name: &str, entries: Vec<IndexEntry>) -> Result<u64, VectorStoreError>;

    /// Ranked nearest neighbours. A missing or empty collection yields no hits.
    async fn query(
        &self,
        name: &str,
        query: &VectorQuery,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError>;

    /// Delete every chunk of a document; returns the number removed.
    async fn delete_by_document(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<u64, VectorStoreError>;

    async fn delete_chunks(&self, name: &str, chunk_ids: &[String])
    -> Result<u64, VectorStoreError>;

    /// Upsert `entries` and delete the `stale` chunk ids, returning
    /// `(written, pruned)`. Backends with transactions commit both together.
    async fn replace_chunks(
        &self,
        name: &str,
        entries: Vec<IndexEntry>,
        stale: &[String],
    ) -> Result<(u64, u64), VectorStoreError> {
        let written = self.upsert(name, entries).await?;
        let pruned = self.delete_chunks(name, stale).await?;
        Ok((written, pruned))
    }

    /// Stored checksum of each chunk of a document, keyed by chunk id.
    async fn chunk_fingerprints(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<HashMap<String, String>, VectorStoreError>;

    /// Indexed documents with their chunk counts, ordered by document id.
    async fn list_documents(&self, name: &str) -> Result<Vec<(String, u64)>, VectorStoreError>;

    /// Metric given to newly created collections.
    fn metric(&self) -> DistanceMetric;

    /// Short backend name for status output.
    fn name(&self) -> &'static str;
}

pub fn validate_collection_name(name: &str) -> Result<(), VectorStoreError> {
    if COLLECTION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(VectorStoreError::InvalidCollectionName(name.to_string()))
    }
}

/// Reject malformed filters and fields the collection has never stored.
pub(crate) fn check_filter(
    filter: Option<&MetadataFilter>,
    is_known: impl Fn(&str) -> bool,
) -> Result<(), VectorStoreError> {
    let Some(filter) = filter else {
        return Ok(());
    };
    filter.validate().map_err(VectorStoreError::InvalidFilter)?;
    for field in filter.fields() {
        if !BUILTIN_FIELDS.contains(&field) && !is_known(field) {
            return Err(VectorStoreError::UnknownFilterField(field.to_string()));
        }
    }
    Ok(())
}

/// Apply the threshold, rank on the raw score, and cut to `top_k`.
///
/// Each hit is paired with the backend's native score for `metric`.
pub(crate) fn finalize_hits(
    metric: DistanceMetric,
    mut hits: Vec<(f32, ScoredChunk)>,
    top_k: usize,
    min_similarity: Option<Similarity>,
) -> Vec<ScoredChunk> {
    if let Some(threshold) = min_similarity {
        hits.retain(|(_, hit)| hit.score >= threshold);
    }
    hits.sort_by(|(raw_a, a), (raw_b, b)| {
        metric
            .rank(*raw_a, *raw_b)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k);
    hits.into_iter().map(|(_, hit)| hit).collect()
}

/// Create a vector store backend based on configuration.
pub async fn create_backend(
    config: &VectorStoreConfig,
) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.driver {
        VectorDriver::Local => {
            let root = config
                .storage_root()
                .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
            let metric = config.metric;
            let backend = tokio::task::spawn_blocking(move || LocalVectorStore::open(&root, metric))
                .await
                .map_err(|e| VectorStoreError::Storage(e.to_string()))??;
            Ok(Arc::new(backend))
        }
        VectorDriver::Qdrant => {
            let backend = QdrantBackend::new(config)?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn hit(metric: DistanceMetric, chunk_id: &str, raw: f32) -> (f32, ScoredChunk) {
        let chunk = ScoredChunk {
            chunk_id: chunk_id.to_string(),
            document_id: "doc".to_string(),
            text: String::new(),
            metadata: Metadata::new(),
            score: metric.similarity(raw),
        };
        (raw, chunk)
    }

    fn chunk_ids(hits: &[ScoredChunk]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_collection_names() {
        assert!(validate_collection_name("rag_chunks").is_ok());
        assert!(validate_collection_name("team-a_2024").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("drop table;").is_err());
        assert!(validate_collection_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_check_filter_rejects_unknown_fields() {
        let known = |f: &str| f == "lang";
        assert!(check_filter(None, known).is_ok());
        assert!(check_filter(Some(&MetadataFilter::eq("lang", "en")), known).is_ok());
        assert!(check_filter(Some(&MetadataFilter::eq("document_id", "a")), known).is_ok());
        assert!(matches!(
            check_filter(Some(&MetadataFilter::eq("author", "x")), known),
            Err(VectorStoreError::UnknownFilterField(f)) if f == "author"
        ));
        assert!(matches!(
            check_filter(Some(&MetadataFilter::All(vec![])), known),
            Err(VectorStoreError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_finalize_hits_orders_thresholds_and_truncates() {
        let cosine = DistanceMetric::Cosine;
        let hits = vec![
            hit(cosine, "c", -0.2),
            hit(cosine, "b", 0.8),
            hit(cosine, "a", 0.8),
            hit(cosine, "d", -0.8),
        ];
        let out = finalize_hits(cosine, hits, 2, None);
        assert_eq!(chunk_ids(&out), vec!["a", "b"]);

        let hits = vec![hit(cosine, "c", -0.2), hit(cosine, "b", 0.8), hit(cosine, "d", -0.8)];
        let out = finalize_hits(cosine, hits, 10, Some(Similarity::new(0.4)));
        assert_eq!(chunk_ids(&out), vec!["b", "c"]);
    }

    #[test]
    fn test_finalize_hits_ranks_saturated_dot_scores_by_raw_value() {
        let dot = DistanceMetric::Dot;
        let hits = vec![hit(dot, "a", 20.0), hit(dot, "b", 250.0), hit(dot, "c", 25.0)];
        let out = finalize_hits(dot, hits, 10, None);
        assert_eq!(chunk_ids(&out), vec!["b", "c", "a"]);
        for pair in out.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_finalize_hits_puts_nearest_distance_first() {
        let euclid = DistanceMetric::Euclidean;
        let hits = vec![hit(euclid, "far", 9.0), hit(euclid, "near", 0.1), hit(euclid, "mid", 2.0)];
        let out = finalize_hits(euclid, hits, 2, None);
        assert_eq!(chunk_ids(&out), vec!["near", "mid"]);
    }
}
