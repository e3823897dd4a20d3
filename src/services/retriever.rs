//! Query surface: text in, ranked chunks out.

use std::sync::Arc;

use crate::error::SearchError;
use crate::models::{QueryRequest, QueryResponse, ScoredChunk, Similarity};
use crate::services::embedding::EmbeddingClient;
use crate::services::vector_store::{VectorQuery, VectorStore};

/// Embeds query text and asks one collection for its nearest chunks.
#[derive(Clone)]
pub struct Retriever {
    embedder: EmbeddingClient,
    store: Arc<dyn VectorStore>,
    collection: String,
    max_top_k: usize,
    default_min_similarity: Option<Similarity>,
}

impl Retriever {
    pub fn new(
        embedder: EmbeddingClient,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        max_top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            max_top_k,
            default_min_similarity: None,
        }
    }

    /// Threshold applied when a request carries none.
    #[must_use]
    pub fn with_default_min_similarity(mut self, threshold: Option<Similarity>) -> Self {
        self.default_min_similarity = threshold;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn max_top_k(&self) -> usize {
        self.max_top_k
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, SearchError> {
        request
            .validate(self.max_top_k)
            .map_err(SearchError::InvalidQuery)?;
        let hits = self.search(request, request.top_k).await?;
        Ok(QueryResponse { hits })
    }

    /// Unvalidated search returning up to `limit` hits. An empty or missing
    /// collection answers without calling the embedding service.
    pub(crate) async fn search(
        &self,
        request: &QueryRequest,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let populated = self
            .store
            .collection_info(&self.collection)
            .await?
            .is_some_and(|info| info.points_count > 0);
        if !populated {
            tracing::debug!(collection = %self.collection, "nothing to search");
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(&request.query_text).await?;
        let query = VectorQuery::new(vector, limit)
            .with_filter(request.filter.clone())
            .with_min_similarity(request.min_similarity.or(self.default_min_similarity));

        let hits = self.store.query(&self.collection, &query).await?;
        tracing::debug!(
            collection = %self.collection,
            hits = hits.len(),
            "query answered"
        );
        Ok(hits)
    }
}
