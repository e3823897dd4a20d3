mod config;
mod document;
mod filter;
mod metric;
mod report;
mod search;

pub use config::{
    Config, CorpusConfig, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_MAX_TOP_K, DEFAULT_QDRANT_URL, EmbeddingConfig, EmbeddingProtocol, IndexingConfig,
    SearchConfig, VectorDriver, VectorStoreConfig,
};
pub use document::{Chunk, Content, DocType, Document, IndexEntry, Metadata};
pub use filter::{FieldPredicate, FilterOp, FilterValue, MetadataFilter, RangeBounds};
pub use metric::DistanceMetric;
pub use report::{DocumentFailure, FailureKind, IndexReport, SkipReason, SkippedDocument};
pub use search::{OutputFormat, QueryRequest, QueryResponse, ScoredChunk, Similarity};
