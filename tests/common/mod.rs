#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use rag_index::error::EmbeddingError;
use rag_index::models::{Config, DistanceMetric};
use rag_index::services::{EmbeddingService, IndexSession, LocalVectorStore, TaskType};

pub const DIMENSION: usize = 32;

/// Deterministic bag-of-words embedder: each lowercase word bumps one hashed
/// axis, and the result is L2-normalized.
pub struct HashedEmbedder {
    pub calls: AtomicUsize,
    /// Drop the last vector of any batch containing this marker.
    pub short_marker: Option<&'static str>,
}

impl HashedEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            short_marker: None,
        }
    }

    pub fn dropping_on(marker: &'static str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            short_marker: Some(marker),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSION];
    for word in text.split_whitespace() {
        let word: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if word.is_empty() {
            continue;
        }
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % DIMENSION as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    } else {
        vector[0] = 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingService for HashedEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
        _task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| embed_text(t)).collect();
        if let Some(marker) = self.short_marker
            && texts.iter().any(|t| t.contains(marker))
        {
            vectors.pop();
        }
        Ok(vectors)
    }

    fn model_id(&self) -> &str {
        "hashed-bow"
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.embedding.dimension = DIMENSION as u32;
    config.embedding.max_retries = 1;
    config.vector_store.path = Some(dir.path().to_path_buf());
    config.indexing.concurrency = 2;
    config
}

pub fn open_store(dir: &TempDir) -> Arc<LocalVectorStore> {
    Arc::new(LocalVectorStore::open(dir.path(), DistanceMetric::Cosine).unwrap())
}

pub fn session_with(dir: &TempDir, config: Config, embedder: Arc<HashedEmbedder>) -> IndexSession {
    let store = open_store(dir);
    IndexSession::from_parts(config, embedder, store).unwrap()
}

pub fn session(dir: &TempDir) -> (IndexSession, Arc<HashedEmbedder>) {
    let embedder = Arc::new(HashedEmbedder::new());
    let session = session_with(dir, test_config(dir), embedder.clone());
    (session, embedder)
}
