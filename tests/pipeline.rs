mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{HashedEmbedder, open_store, session, session_with, test_config};
use rag_index::error::{SearchError, VectorStoreError};
use rag_index::models::{
    Chunk, DocType, Document, FailureKind, MetadataFilter, QueryRequest, Similarity,
};
use rag_index::services::{IndexSession, VectorStore};

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "post-rust",
            DocType::Post,
            "Rust ownership and borrowing make memory safety a compile time property",
        )
        .with_metadata("lang", "en")
        .with_metadata("year", 2023),
        Document::new(
            "post-garden",
            DocType::Post,
            "Tomatoes need plenty of sun and steady watering through the summer",
        )
        .with_metadata("lang", "en")
        .with_metadata("year", 2024),
        Document::new(
            "note-bread",
            DocType::Note,
            "Sourdough bread rises slowly overnight in a cool kitchen",
        )
        .with_metadata("lang", "fr")
        .with_metadata("year", 2024),
    ]
}

async fn chunk_count(session: &IndexSession) -> u64 {
    session
        .store()
        .collection_info(session.collection())
        .await
        .unwrap()
        .map_or(0, |info| info.points_count)
}

#[tokio::test]
async fn test_scenario_a_120_chars_makes_three_chunks() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.indexing.max_chars = 50;
    let session = session_with(&dir, config, Arc::new(HashedEmbedder::new()));

    let mut words = vec!["alpha"; 19];
    words.push("omegas");
    let content = words.join(" ");
    assert_eq!(content.chars().count(), 120);

    let report = session
        .indexer()
        .reindex(vec![Document::new("doc", DocType::Post, content.clone())])
        .await
        .unwrap();
    assert_eq!(report.chunks_written, 3);

    let response = session
        .retriever()
        .query(&QueryRequest::new("alpha", 10))
        .await
        .unwrap();
    assert_eq!(response.len(), 3);
    for hit in &response.hits {
        assert!(hit.text.chars().count() <= 50);
        assert!(content.contains(&hit.text));
        assert!(!hit.text.starts_with(' ') && !hit.text.ends_with(' '));
    }
}

#[tokio::test]
async fn test_scenario_b_zero_documents_leaves_empty_collection() {
    let dir = TempDir::new().unwrap();
    let (session, embedder) = session(&dir);

    let report = session.indexer().reindex(Vec::new()).await.unwrap();
    assert_eq!(report.total(), 0);

    let info = session
        .store()
        .collection_info(session.collection())
        .await
        .unwrap()
        .expect("collection created");
    assert_eq!(info.points_count, 0);

    let response = session
        .retriever()
        .query(&QueryRequest::new("anything", 5))
        .await
        .unwrap();
    assert!(response.is_empty());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn test_scenario_c_reindexing_unchanged_corpus_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let (session, embedder) = session(&dir);

    let first = session.indexer().reindex(corpus()).await.unwrap();
    assert_eq!(first.indexed, 3);
    let rows = chunk_count(&session).await;
    let calls = embedder.calls();

    let second = session.indexer().reindex(corpus()).await.unwrap();
    assert_eq!(second.chunks_written, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(chunk_count(&session).await, rows);
    assert_eq!(embedder.calls(), calls);
}

#[tokio::test]
async fn test_changed_metadata_rewrites_only_that_document() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    session.indexer().reindex(corpus()).await.unwrap();

    let mut docs = corpus();
    docs[1] = docs[1].clone().with_metadata("year", 2025);
    let report = session.indexer().reindex(docs).await.unwrap();

    assert_eq!(report.indexed, 1);
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.chunks_written, 1);
}

#[tokio::test]
async fn test_scenario_d_short_embedding_batch_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.indexing.max_chars = 12;
    let embedder = Arc::new(HashedEmbedder::dropping_on("broken"));
    let session = session_with(&dir, config, embedder);

    let docs = vec![
        Document::new("bad", DocType::Post, "one broken batch of words"),
        Document::new("good", DocType::Post, "fine text"),
    ];
    let report = session.indexer().reindex(docs).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].document_id, "bad");
    assert_eq!(report.failures[0].kind, FailureKind::Integrity);
    assert!(
        session
            .store()
            .chunk_fingerprints(session.collection(), "bad")
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(report.indexed, 1);
}

#[tokio::test]
async fn test_scenario_e_top_k_larger_than_collection() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    session.indexer().reindex(corpus()).await.unwrap();
    assert_eq!(chunk_count(&session).await, 3);

    let response = session
        .retriever()
        .query(&QueryRequest::new("summer kitchen", 5))
        .await
        .unwrap();
    assert_eq!(response.len(), 3);
}

#[tokio::test]
async fn test_scores_bounded_and_ordered() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    session.indexer().reindex(corpus()).await.unwrap();

    let response = session
        .retriever()
        .query(&QueryRequest::new("bread rises overnight", 3))
        .await
        .unwrap();
    for pair in response.hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for hit in &response.hits {
        assert!((0.0..=1.0).contains(&hit.score.value()));
    }
}

#[tokio::test]
async fn test_document_text_retrieves_itself_first() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    session.indexer().reindex(corpus()).await.unwrap();
    let retriever = session.retriever();

    for doc in corpus() {
        let text = doc.content.as_text().unwrap().to_string();
        let response = retriever.query(&QueryRequest::new(text, 1)).await.unwrap();
        assert_eq!(response.hits[0].document_id, doc.document_id);
        assert_eq!(response.hits[0].chunk_id, Chunk::generate_id(&doc.document_id, 0));
        assert!(response.hits[0].score.value() > 0.99);
    }
}

#[tokio::test]
async fn test_metadata_survives_the_round_trip() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    session.indexer().reindex(corpus()).await.unwrap();

    let response = session
        .retriever()
        .query(&QueryRequest::new("tomatoes sun watering", 1))
        .await
        .unwrap();
    let hit = &response.hits[0];
    assert_eq!(hit.document_id, "post-garden");
    assert_eq!(hit.metadata["lang"], "en");
    assert_eq!(hit.metadata["year"], 2024);
    assert_eq!(hit.metadata["doc_type"], "post");
    assert_eq!(hit.metadata["chunk_index"], 0);
    assert_eq!(hit.metadata["document_id"], "post-garden");
}

#[tokio::test]
async fn test_filters_narrow_results_and_reject_unknown_fields() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    session.indexer().reindex(corpus()).await.unwrap();
    let retriever = session.retriever();

    let request = QueryRequest::new("summer", 5).with_filter(MetadataFilter::eq("lang", "fr"));
    let response = retriever.query(&request).await.unwrap();
    let ids: Vec<&str> = response.hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(ids, vec!["note-bread"]);

    let request =
        QueryRequest::new("summer", 5).with_filter("year>=2024".parse::<MetadataFilter>().unwrap());
    assert_eq!(retriever.query(&request).await.unwrap().len(), 2);

    let request = QueryRequest::new("summer", 5).with_filter(MetadataFilter::eq("author", "x"));
    assert!(matches!(
        retriever.query(&request).await,
        Err(SearchError::VectorStore(VectorStoreError::UnknownFilterField(f))) if f == "author"
    ));
}

#[tokio::test]
async fn test_threshold_filters_weak_hits() {
    let dir = TempDir::new().unwrap();
    let (session, _) = session(&dir);
    session.indexer().reindex(corpus()).await.unwrap();

    let request = QueryRequest::new(
        "Rust ownership and borrowing make memory safety a compile time property",
        5,
    )
    .with_min_similarity(Similarity::new(0.99));
    let response = session.retriever().query(&request).await.unwrap();
    assert_eq!(response.len(), 1);
    assert_eq!(response.hits[0].document_id, "post-rust");
}

#[tokio::test]
async fn test_index_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let (session, _) = session(&dir);
        session.indexer().reindex(corpus()).await.unwrap();
    }

    let store = open_store(&dir);
    let documents = store.list_documents("rag_chunks").await.unwrap();
    let ids: Vec<&str> = documents.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["note-bread", "post-garden", "post-rust"]);

    let (session, _) = session(&dir);
    let response = session
        .retriever()
        .query(&QueryRequest::new("sourdough", 1))
        .await
        .unwrap();
    assert_eq!(response.hits[0].document_id, "note-bread");
}

#[tokio::test]
async fn test_delete_cascades_to_every_chunk() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.indexing.max_chars = 20;
    let session = session_with(&dir, config, Arc::new(HashedEmbedder::new()));
    session.indexer().reindex(corpus()).await.unwrap();

    let before = session
        .store()
        .chunk_fingerprints(session.collection(), "post-rust")
        .await
        .unwrap()
        .len() as u64;
    assert!(before > 1);

    let removed = session.indexer().delete_document("post-rust").await.unwrap();
    assert_eq!(removed, before);

    let response = session
        .retriever()
        .query(&QueryRequest::new("ownership borrowing", 10))
        .await
        .unwrap();
    assert!(response.hits.iter().all(|h| h.document_id != "post-rust"));
}

#[tokio::test]
async fn test_sessions_on_different_collections_are_isolated() {
    let dir = TempDir::new().unwrap();
    let (base, _) = session(&dir);
    let left = base.clone().with_collection("left").unwrap();
    let (other, _) = session(&dir);
    let right = other.with_collection("right").unwrap();

    left.indexer().reindex(corpus()).await.unwrap();

    let request = QueryRequest::new("tomatoes", 3);
    assert!(!left.retriever().query(&request).await.unwrap().is_empty());
    assert!(right.retriever().query(&request).await.unwrap().is_empty());
    assert_eq!(chunk_count(&right).await, 0);
}
