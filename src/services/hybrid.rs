//! Vector search joined with the relational corpus.
//!
//! Candidates are over-fetched from the vector store, filtered against the
//! corpus in one query, and cut back to `top_k` in vector-rank order.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::error::SearchError;
use crate::models::{MetadataFilter, QueryRequest, ScoredChunk, SearchConfig};
use crate::services::corpus::{CorpusRecord, CorpusStore};
use crate::services::retriever::Retriever;

/// Corpus column to group hybrid hits by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusField {
    DocType,
    CreatedDay,
    Attribute(String),
}

impl std::str::FromStr for CorpusField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("group-by field cannot be empty".to_string()),
            "doc_type" | "type" => Ok(CorpusField::DocType),
            "created_day" | "day" => Ok(CorpusField::CreatedDay),
            other => Ok(CorpusField::Attribute(other.to_string())),
        }
    }
}

impl CorpusField {
    fn key(&self, record: &CorpusRecord) -> String {
        match self {
            CorpusField::DocType => record.doc_type.to_string(),
            CorpusField::CreatedDay => record.created_day().unwrap_or(UNKNOWN_KEY).to_string(),
            CorpusField::Attribute(name) => match record.attributes.get(name) {
                None | Some(serde_json::Value::Null) => UNKNOWN_KEY.to_string(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            },
        }
    }
}

const UNKNOWN_KEY: &str = "(none)";

#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub request: QueryRequest,
    pub corpus_filter: Option<MetadataFilter>,
    pub group_by: Option<CorpusField>,
}

impl HybridQuery {
    pub fn new(request: QueryRequest) -> Self {
        Self {
            request,
            corpus_filter: None,
            group_by: None,
        }
    }

    #[must_use]
    pub fn with_corpus_filter(mut self, filter: Option<MetadataFilter>) -> Self {
        self.corpus_filter = filter;
        self
    }

    #[must_use]
    pub fn group_by(mut self, field: Option<CorpusField>) -> Self {
        self.group_by = field;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridHit {
    #[serde(flatten)]
    pub chunk: ScoredChunk,
    pub document: CorpusRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub key: String,
    pub count: usize,
    pub best_score: f32,
    pub mean_score: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HybridResponse {
    pub hits: Vec<HybridHit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<AggregateRow>,
}

pub struct HybridQueryEngine {
    retriever: Retriever,
    corpus: Arc<dyn CorpusStore>,
    overfetch: usize,
    max_candidates: usize,
}

impl HybridQueryEngine {
    pub fn new(retriever: Retriever, corpus: Arc<dyn CorpusStore>, search: &SearchConfig) -> Self {
        Self {
            retriever,
            corpus,
            overfetch: search.overfetch.max(1),
            max_candidates: search.max_candidates,
        }
    }

    /// Number of vector candidates fetched for a request of `top_k`.
    pub fn candidate_count(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.overfetch)
            .min(self.max_candidates)
            .max(top_k)
    }

    pub async fn query(&self, query: &HybridQuery) -> Result<HybridResponse, SearchError> {
        let request = &query.request;
        request
            .validate(self.retriever.max_top_k())
            .map_err(SearchError::InvalidQuery)?;
        if let Some(filter) = &query.corpus_filter {
            filter.validate().map_err(SearchError::InvalidQuery)?;
        }

        let fetch_k = self.candidate_count(request.top_k);
        let candidates = self.retriever.search(request, fetch_k).await?;
        if candidates.is_empty() {
            return Ok(HybridResponse::default());
        }

        let mut seen = HashSet::new();
        let ids: Vec<String> = candidates
            .iter()
            .filter(|hit| seen.insert(hit.document_id.as_str()))
            .map(|hit| hit.document_id.clone())
            .collect();
        let records = self
            .corpus
            .fetch(&ids, query.corpus_filter.as_ref())
            .await?;

        let total = candidates.len();
        let hits: Vec<HybridHit> = candidates
            .into_iter()
            .filter_map(|chunk| {
                let document = records.get(&chunk.document_id)?.clone();
                Some(HybridHit { chunk, document })
            })
            .take(request.top_k)
            .collect();

        tracing::debug!(
            candidates = total,
            documents = ids.len(),
            hits = hits.len(),
            "hybrid query joined"
        );

        let aggregates = query
            .group_by
            .as_ref()
            .map(|field| aggregate(&hits, field))
            .unwrap_or_default();

        Ok(HybridResponse { hits, aggregates })
    }
}

/// Group hits by `field`; rows ordered by count desc, then key.
pub fn aggregate(hits: &[HybridHit], field: &CorpusField) -> Vec<AggregateRow> {
    let mut groups: BTreeMap<String, (usize, f32, f32)> = BTreeMap::new();
    for hit in hits {
        let score = hit.chunk.score.value();
        let entry = groups
            .entry(field.key(&hit.document))
            .or_insert((0, f32::MIN, 0.0));
        entry.0 += 1;
        entry.1 = entry.1.max(score);
        entry.2 += score;
    }

    let mut rows: Vec<AggregateRow> = groups
        .into_iter()
        .map(|(key, (count, best, sum))| AggregateRow {
            key,
            count,
            best_score: best,
            mean_score: sum / count as f32,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    rows
}
