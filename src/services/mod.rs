mod chunker;
pub mod corpus;
pub mod embedding;
pub mod hybrid;
mod indexer;
mod retriever;
mod session;
mod sql_filter;
pub mod vector_store;

pub use chunker::TextChunker;
pub use corpus::{CorpusRecord, CorpusStore, SqliteCorpusStore};
pub use embedding::{EmbeddingClient, EmbeddingService, HttpEmbeddingService, TaskType};
pub use hybrid::{AggregateRow, CorpusField, HybridHit, HybridQuery, HybridQueryEngine, HybridResponse};
pub use indexer::Indexer;
pub use retriever::Retriever;
pub use session::IndexSession;
pub use vector_store::{
    CollectionInfo, LocalVectorStore, QdrantBackend, VectorQuery, VectorStore, create_backend,
};
