//! Query requests, scored results and output formats.

use serde::{Deserialize, Serialize};

use super::document::Metadata;
use super::filter::MetadataFilter;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Normalized similarity: always within `[0.0, 1.0]`, higher is more similar.
///
/// Values can only be built through [`Similarity::new`] (clamping) or
/// [`Similarity::try_new`] (validating), so raw backend distances never leak
/// through the query API.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Similarity(f32);

impl Similarity {
    pub const MIN: Similarity = Similarity(0.0);
    pub const MAX: Similarity = Similarity(1.0);

    /// Clamp into range; NaN becomes the minimum.
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Similarity(value.clamp(0.0, 1.0))
    }

    /// Accept only values already in range (user supplied thresholds).
    pub fn try_new(value: f32) -> Result<Self, String> {
        if (0.0..=1.0).contains(&value) {
            Ok(Similarity(value))
        } else {
            Err(format!("similarity must be between 0.0 and 1.0, got {value}"))
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Similarity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f32::deserialize(deserializer)?;
        Similarity::try_new(value).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Similarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// A similarity query against one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query_text: String,
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<MetadataFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<Similarity>,
}

impl QueryRequest {
    pub fn new(query_text: impl Into<String>, top_k: usize) -> Self {
        Self {
            query_text: query_text.into(),
            top_k,
            filter: None,
            min_similarity: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_min_similarity(mut self, threshold: Similarity) -> Self {
        self.min_similarity = Some(threshold);
        self
    }

    /// Reject out-of-range requests instead of clamping them.
    pub fn validate(&self, max_top_k: usize) -> Result<(), String> {
        if self.query_text.trim().is_empty() {
            return Err("query text cannot be empty".to_string());
        }
        if self.top_k == 0 || self.top_k > max_top_k {
            return Err(format!(
                "top_k must be between 1 and {max_top_k}, got {}",
                self.top_k
            ));
        }
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        Ok(())
    }
}

/// One ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: Similarity,
}

/// Ranked results: closest first by the collection's native score, ties
/// broken by `chunk_id` ascending. Scores are therefore non-increasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub hits: Vec<ScoredChunk>,
}

impl QueryResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}
