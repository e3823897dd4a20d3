//! Wiring of one configured set of services.
//!
//! A session owns its embedding client and vector store; two sessions built
//! from the same config share nothing.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, CorpusError};
use crate::models::{Config, Similarity};
use crate::services::chunker::TextChunker;
use crate::services::corpus::{CorpusStore, SqliteCorpusStore};
use crate::services::embedding::{EmbeddingClient, EmbeddingService};
use crate::services::hybrid::HybridQueryEngine;
use crate::services::indexer::Indexer;
use crate::services::retriever::Retriever;
use crate::services::vector_store::{VectorStore, create_backend, validate_collection_name};
use crate::utils::retry::RetryConfig;

#[derive(Clone)]
pub struct IndexSession {
    config: Config,
    embedder: EmbeddingClient,
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl IndexSession {
    /// Build the HTTP embedding client and the configured backend.
    pub async fn from_config(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let embedder = EmbeddingClient::from_config(&config.embedding)?;
        let store = create_backend(&config.vector_store).await?;
        Self::assemble(config, embedder, store)
    }

    /// Session over injected services.
    pub fn from_parts(
        config: Config,
        service: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, AppError> {
        let embedder = EmbeddingClient::new(service, &config.embedding);
        Self::assemble(config, embedder, store)
    }

    fn assemble(
        config: Config,
        embedder: EmbeddingClient,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, AppError> {
        let collection = config.vector_store.collection.clone();
        validate_collection_name(&collection)?;
        Ok(Self {
            config,
            embedder,
            store,
            collection,
        })
    }

    /// Same services, another collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Result<Self, AppError> {
        let collection = collection.into();
        validate_collection_name(&collection)?;
        self.collection = collection;
        Ok(self)
    }

    pub fn indexer(&self) -> Indexer {
        let embedding = &self.config.embedding;
        let write_retry = RetryConfig::new(embedding.max_retries)
            .with_initial_delay(Duration::from_millis(embedding.initial_backoff_ms))
            .with_max_delay(Duration::from_secs(embedding.max_backoff_secs));

        Indexer::new(
            TextChunker::new(&self.config.indexing),
            self.embedder.clone(),
            Arc::clone(&self.store),
            self.collection.clone(),
            embedding.dimension as usize,
        )
        .with_concurrency(self.config.indexing.concurrency)
        .with_write_retry(write_retry)
    }

    pub fn retriever(&self) -> Retriever {
        let search = &self.config.search;
        Retriever::new(
            self.embedder.clone(),
            Arc::clone(&self.store),
            self.collection.clone(),
            search.max_top_k,
        )
        .with_default_min_similarity(search.default_min_similarity.map(Similarity::new))
    }

    pub fn hybrid(&self, corpus: Arc<dyn CorpusStore>) -> HybridQueryEngine {
        HybridQueryEngine::new(self.retriever(), corpus, &self.config.search)
    }

    /// The configured corpus database, if any.
    pub fn corpus_store(&self) -> Result<Option<SqliteCorpusStore>, CorpusError> {
        self.config
            .corpus
            .path
            .as_ref()
            .map(SqliteCorpusStore::at)
            .transpose()
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}
