use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::calculate_checksum;

/// Arbitrary provider-specific metadata attached to documents and chunks.
pub type Metadata = Map<String, Value>;

/// Kind of corpus document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocType {
    Post,
    Note,
    Profile,
    Journal,
    Enrichment,
    Media,
    Other(String),
}

impl DocType {
    pub fn as_str(&self) -> &str {
        match self {
            DocType::Post => "post",
            DocType::Note => "note",
            DocType::Profile => "profile",
            DocType::Journal => "journal",
            DocType::Enrichment => "enrichment",
            DocType::Media => "media",
            DocType::Other(name) => name,
        }
    }
}

impl From<String> for DocType {
    fn from(value: String) -> Self {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "post" => DocType::Post,
            "note" => DocType::Note,
            "profile" => DocType::Profile,
            "journal" => DocType::Journal,
            "enrichment" => DocType::Enrichment,
            "media" => DocType::Media,
            _ => DocType::Other(value),
        }
    }
}

impl From<DocType> for String {
    fn from(value: DocType) -> Self {
        value.as_str().to_string()
    }
}

impl std::str::FromStr for DocType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DocType::from(s.to_string()))
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document payload. Binary payloads are carried through but never chunked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Binary(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub doc_type: DocType,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(
        document_id: impl Into<String>,
        doc_type: DocType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            doc_type,
            content: Content::Text(content.into()),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A bounded, deterministically identified slice of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    /// Stable id for `(document_id, chunk_index)`, identical across runs and processes.
    pub fn generate_id(document_id: &str, chunk_index: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", document_id, chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// Builds a chunk; `document_id`, `chunk_index` and `doc_type` override any
    /// document metadata keys of the same name.
    pub fn from_document(document: &Document, text: String, chunk_index: u32) -> Self {
        let mut metadata = document.metadata.clone();
        metadata.insert(
            "document_id".to_string(),
            Value::String(document.document_id.clone()),
        );
        metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
        metadata.insert(
            "doc_type".to_string(),
            Value::String(document.doc_type.to_string()),
        );

        Self {
            chunk_id: Self::generate_id(&document.document_id, chunk_index),
            document_id: document.document_id.clone(),
            chunk_index,
            text,
            metadata,
        }
    }

    /// Content fingerprint used to detect chunks that need no re-embedding.
    pub fn fingerprint(&self, model_id: &str) -> String {
        let sorted: BTreeMap<&String, &Value> = self.metadata.iter().collect();
        let metadata = serde_json::to_string(&sorted).unwrap_or_default();
        calculate_checksum(&format!("{model_id}\u{1f}{}\u{1f}{metadata}", self.text))
    }

    pub fn into_entry(self, vector: Vec<f32>, checksum: String) -> IndexEntry {
        IndexEntry {
            chunk_id: self.chunk_id,
            document_id: self.document_id,
            chunk_index: self.chunk_index,
            vector,
            text: self.text,
            metadata: self.metadata,
            checksum,
        }
    }
}

/// A chunk with its embedding, as persisted by a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_type_names_are_case_insensitive() {
        assert_eq!(DocType::from("POST".to_string()), DocType::Post);
        assert_eq!(
            DocType::from("Announcement".to_string()),
            DocType::from("announcement".to_string())
        );
        assert_eq!("Announcement".parse::<DocType>().unwrap().as_str(), "announcement");

        let parsed: DocType = serde_json::from_value(json!("Announcement")).unwrap();
        assert_eq!(parsed, DocType::Other("announcement".to_string()));
    }

    #[test]
    fn test_chunk_generate_id() {
        let id = Chunk::generate_id("abc123", 5);
        assert_eq!(id.len(), 36);
        assert!(id.chars().filter(|c| *c == '-').count() == 4);
        let id2 = Chunk::generate_id("abc123", 5);
        assert_eq!(id, id2);
        let id3 = Chunk::generate_id("abc123", 6);
        assert_ne!(id, id3);
        assert_ne!(Chunk::generate_id("a:1", 2), Chunk::generate_id("a", 12));
    }

    #[test]
    fn test_chunk_metadata_reserved_keys_win() {
        let doc = Document::new("doc-1", DocType::Post, "hello")
            .with_metadata("author", "anon-42")
            .with_metadata("document_id", "spoofed");
        let chunk = Chunk::from_document(&doc, "hello".to_string(), 0);

        assert_eq!(chunk.metadata["document_id"], json!("doc-1"));
        assert_eq!(chunk.metadata["chunk_index"], json!(0));
        assert_eq!(chunk.metadata["doc_type"], json!("post"));
        assert_eq!(chunk.metadata["author"], json!("anon-42"));
    }

    #[test]
    fn test_fingerprint_tracks_text_metadata_and_model() {
        let doc = Document::new("doc-1", DocType::Note, "text");
        let chunk = Chunk::from_document(&doc, "text".to_string(), 0);
        let base = chunk.fingerprint("model-a");

        assert_eq!(base, chunk.fingerprint("model-a"));
        assert_ne!(base, chunk.fingerprint("model-b"));

        let mut edited = chunk.clone();
        edited.text.push('!');
        assert_ne!(base, edited.fingerprint("model-a"));

        let mut retagged = chunk;
        retagged.metadata.insert("lang".into(), json!("en"));
        assert_ne!(base, retagged.fingerprint("model-a"));
    }

    #[test]
    fn test_document_deserialize() {
        let doc: Document = serde_json::from_value(json!({
            "document_id": "p1",
            "doc_type": "POST",
            "content": "hello world",
            "metadata": {"slug": "hello"}
        }))
        .unwrap();
        assert_eq!(doc.doc_type, DocType::Post);
        assert_eq!(doc.content.as_text(), Some("hello world"));

        let media: Document = serde_json::from_value(json!({
            "document_id": "m1",
            "doc_type": "media",
            "content": [137, 80, 78, 71]
        }))
        .unwrap();
        assert!(media.content.as_text().is_none());

        let custom: Document = serde_json::from_value(json!({
            "document_id": "x", "doc_type": "announcement"
        }))
        .unwrap();
        assert_eq!(custom.doc_type, DocType::Other("announcement".into()));
        assert_eq!(custom.content, Content::Text(String::new()));
    }
}
