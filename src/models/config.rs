use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::document::DocType;
use super::metric::DistanceMetric;
use super::search::OutputFormat;
use crate::error::ConfigError;

pub const DEFAULT_EMBEDDING_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "rag_chunks";
pub const DEFAULT_MAX_TOP_K: usize = 100;

/// Environment variables that override file settings.
pub const ENV_STORE_PATH: &str = "RAG_INDEX_STORE_PATH";
pub const ENV_EMBEDDING_URL: &str = "RAG_INDEX_EMBEDDING_URL";
pub const ENV_CORPUS_PATH: &str = "RAG_INDEX_CORPUS_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rag-index").join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_STORE_PATH)
            && !path.is_empty()
        {
            self.vector_store.path = Some(PathBuf::from(path));
        }
        if let Ok(url) = std::env::var(ENV_EMBEDDING_URL)
            && !url.is_empty()
        {
            self.embedding.url = url;
        }
        if let Ok(path) = std::env::var(ENV_CORPUS_PATH)
            && !path.is_empty()
        {
            self.corpus.path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.embedding.batch_size == 0 {
            return fail("embedding.batch_size must be at least 1".into());
        }
        if self.embedding.dimension == 0 {
            return fail("embedding.dimension must be at least 1".into());
        }
        if self.embedding.max_retries == 0 {
            return fail("embedding.max_retries must be at least 1".into());
        }
        if self.indexing.max_chars == 0 {
            return fail("indexing.max_chars must be at least 1".into());
        }
        if self.indexing.chunk_overlap >= self.indexing.max_chars {
            return fail(format!(
                "indexing.chunk_overlap ({}) must be smaller than indexing.max_chars ({})",
                self.indexing.chunk_overlap, self.indexing.max_chars
            ));
        }
        if self.indexing.concurrency == 0 {
            return fail("indexing.concurrency must be at least 1".into());
        }
        if self.search.max_top_k == 0 {
            return fail("search.max_top_k must be at least 1".into());
        }
        if self.search.default_top_k == 0 || self.search.default_top_k > self.search.max_top_k {
            return fail(format!(
                "search.default_top_k must be between 1 and {}",
                self.search.max_top_k
            ));
        }
        if let Some(threshold) = self.search.default_min_similarity
            && !(0.0..=1.0).contains(&threshold)
        {
            return fail("search.default_min_similarity must be between 0.0 and 1.0".into());
        }
        if self.search.overfetch == 0 {
            return fail("search.overfetch must be at least 1".into());
        }
        Ok(())
    }
}

/// Wire protocol spoken by the embedding service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProtocol {
    /// Google `batchEmbedContents`.
    #[default]
    Gemini,
    /// text-embeddings-inference style `POST /embed`.
    Tei,
}

impl std::fmt::Display for EmbeddingProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProtocol::Gemini => write!(f, "gemini"),
            EmbeddingProtocol::Tei => write!(f, "tei"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub protocol: EmbeddingProtocol,

    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_timeout() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: EmbeddingProtocol::default(),
            url: default_embedding_url(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            dimension: default_dimension(),
            timeout_secs: default_timeout(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    /// SQLite file under the storage root.
    #[default]
    Local,
    Qdrant,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Local => write!(f, "local"),
            VectorDriver::Qdrant => write!(f, "qdrant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    /// Storage root for the local driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub metric: DistanceMetric,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

impl VectorStoreConfig {
    /// Configured storage root, or the platform data directory.
    pub fn storage_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|p| p.join("rag-index"))
            .ok_or_else(|| ConfigError::PathError("could not determine data directory".into()))
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            path: None,
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            metric: DistanceMetric::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    #[serde(default)]
    pub chunk_overlap: usize,

    #[serde(default = "default_indexable_types")]
    pub indexable_types: Vec<DocType>,

    /// Documents processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_max_chars() -> usize {
    800
}

fn default_indexable_types() -> Vec<DocType> {
    vec![DocType::Post, DocType::Note]
}

fn default_concurrency() -> usize {
    4
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            chunk_overlap: 0,
            indexable_types: default_indexable_types(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_min_similarity: Option<f32>,

    /// Candidate multiplier for hybrid queries.
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default)]
    pub default_format: OutputFormat,
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    DEFAULT_MAX_TOP_K
}

fn default_overfetch() -> usize {
    5
}

fn default_max_candidates() -> usize {
    500
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            default_min_similarity: None,
            overfetch: default_overfetch(),
            max_candidates: default_max_candidates(),
            default_format: OutputFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// SQLite database holding the `documents` table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.embedding.url, DEFAULT_EMBEDDING_URL);
        assert_eq!(config.vector_store.driver, VectorDriver::Local);
        assert_eq!(config.vector_store.collection, DEFAULT_COLLECTION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.is_some());
    }

    #[test]
    fn test_embedding_config_default() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.dimension, 768);
    }

    #[test]
    fn test_indexing_config_default() {
        let config = IndexingConfig::default();
        assert_eq!(config.max_chars, 800);
        assert_eq!(config.chunk_overlap, 0);
        assert_eq!(config.indexable_types, vec![DocType::Post, DocType::Note]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [vector_store]
            driver = "qdrant"
            metric = "euclidean"

            [indexing]
            indexable_types = ["post", "journal"]
            "#,
        )
        .unwrap();
        assert_eq!(config.vector_store.driver, VectorDriver::Qdrant);
        assert_eq!(config.vector_store.metric, DistanceMetric::Euclidean);
        assert_eq!(config.vector_store.url, DEFAULT_QDRANT_URL);
        assert_eq!(
            config.indexing.indexable_types,
            vec![DocType::Post, DocType::Journal]
        );
        assert_eq!(config.search.max_top_k, DEFAULT_MAX_TOP_K);
    }

    #[test]
    fn test_validation_rejects_bad_bounds() {
        let mut config = Config::default();
        config.search.default_top_k = 500;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.indexing.chunk_overlap = config.indexing.max_chars;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.default_min_similarity = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.search.max_top_k = 20;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.search.max_top_k, 20);
    }
}
