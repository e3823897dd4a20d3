//! Relational corpus store joined against vector hits by the hybrid engine.
//!
//! Queries open the database read-only. Writes exist for the CLI importer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CorpusError;
use crate::models::{DocType, Document, Metadata, MetadataFilter};
use crate::services::sql_filter::{self, SqlFields};

/// Document columns a corpus filter can reference directly.
pub const CORPUS_COLUMNS: [&str; 4] = ["document_id", "doc_type", "created_at", "title"];

const CORPUS_FIELDS: SqlFields<'static> = SqlFields {
    columns: &CORPUS_COLUMNS,
    json_column: "attributes",
};

// Ids are bound in groups to stay under SQLite's parameter limit.
const ID_GROUP: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    document_id TEXT PRIMARY KEY,
    doc_type TEXT NOT NULL,
    created_at TEXT,
    title TEXT,
    attributes TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(doc_type);
"#;

const UPSERT_DOCUMENT: &str = r#"
INSERT INTO documents (document_id, doc_type, created_at, title, attributes)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (document_id) DO UPDATE SET
    doc_type = excluded.doc_type,
    created_at = excluded.created_at,
    title = excluded.title,
    attributes = excluded.attributes
"#;

/// One row of the corpus, as attached to hybrid hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub document_id: String,
    pub doc_type: DocType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub attributes: Metadata,
}

impl CorpusRecord {
    /// `YYYY-MM-DD` prefix of `created_at`.
    pub fn created_day(&self) -> Option<&str> {
        self.created_at
            .as_deref()
            .and_then(|ts| ts.get(..10))
            .filter(|day| day.len() == 10)
    }
}

#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Records for `ids` that exist and satisfy `filter`, keyed by document id.
    async fn fetch(
        &self,
        ids: &[String],
        filter: Option<&MetadataFilter>,
    ) -> Result<HashMap<String, CorpusRecord>, CorpusError>;
}

/// Corpus kept in a SQLite `documents` table.
#[derive(Debug, Clone)]
pub struct SqliteCorpusStore {
    path: PathBuf,
}

impl SqliteCorpusStore {
    /// Open or create the database file and its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CorpusError::NotFound(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { path })
    }

    /// Attach to an existing database for querying only.
    pub fn at(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(CorpusError::NotFound(path.display().to_string()));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace rows for `documents`. `created_at` and `title` are
    /// lifted out of the metadata; every other key becomes an attribute.
    pub async fn upsert_documents(&self, documents: &[Document]) -> Result<usize, CorpusError> {
        let rows: Vec<(String, String, Option<String>, Option<String>, String)> = documents
            .iter()
            .map(|doc| {
                let mut attributes = doc.metadata.clone();
                let created_at = take_string(&mut attributes, "created_at");
                let title = take_string(&mut attributes, "title");
                (
                    doc.document_id.clone(),
                    doc.doc_type.to_string(),
                    created_at,
                    title,
                    Value::Object(attributes).to_string(),
                )
            })
            .collect();

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(UPSERT_DOCUMENT)?;
                for (id, doc_type, created_at, title, attributes) in &rows {
                    stmt.execute(params![id, doc_type, created_at, title, attributes])?;
                }
            }
            tx.commit()?;
            Ok::<_, CorpusError>(rows.len())
        })
        .await
        .map_err(|e| CorpusError::Task(e.to_string()))?
    }
}

#[async_trait]
impl CorpusStore for SqliteCorpusStore {
    async fn fetch(
        &self,
        ids: &[String],
        filter: Option<&MetadataFilter>,
    ) -> Result<HashMap<String, CorpusRecord>, CorpusError> {
        if let Some(filter) = filter {
            filter.validate().map_err(CorpusError::InvalidFilter)?;
        }
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let path = self.path.clone();
        let ids = ids.to_vec();
        let filter = filter.cloned();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            if let Some(filter) = &filter {
                check_fields(&conn, filter)?;
            }

            let mut records = HashMap::new();
            for group in ids.chunks(ID_GROUP) {
                let mut params: Vec<SqlValue> =
                    group.iter().map(|id| SqlValue::Text(id.clone())).collect();
                let mut sql = format!(
                    "SELECT document_id, doc_type, created_at, title, attributes FROM documents \
                     WHERE document_id IN ({})",
                    vec!["?"; group.len()].join(", ")
                );
                if let Some(filter) = &filter {
                    sql.push_str(" AND ");
                    sql.push_str(&sql_filter::translate(filter, &CORPUS_FIELDS, &mut params));
                }

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?;
                for row in rows {
                    let (document_id, doc_type, created_at, title, attributes) = row?;
                    let attributes = serde_json::from_str::<Metadata>(&attributes)
                        .unwrap_or_default();
                    records.insert(document_id.clone(), CorpusRecord {
                        document_id,
                        doc_type: DocType::from(doc_type),
                        created_at,
                        title,
                        attributes,
                    });
                }
            }
            Ok::<_, CorpusError>(records)
        })
        .await
        .map_err(|e| CorpusError::Task(e.to_string()))?
    }
}

fn take_string(metadata: &mut Metadata, key: &str) -> Option<String> {
    match metadata.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Every non-column field must appear as an attribute key somewhere in the corpus.
fn check_fields(conn: &Connection, filter: &MetadataFilter) -> Result<(), CorpusError> {
    let mut stmt = conn.prepare(
        "SELECT EXISTS (SELECT 1 FROM documents, json_each(documents.attributes) \
         WHERE json_each.key = ?1)",
    )?;
    for field in filter.fields() {
        if CORPUS_COLUMNS.contains(&field) {
            continue;
        }
        let known: bool = stmt.query_row(params![field], |row| row.get(0))?;
        if !known {
            return Err(CorpusError::UnknownField(field.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus_docs() -> Vec<Document> {
        vec![
            Document::new("p1", DocType::Post, "first post")
                .with_metadata("created_at", "2024-03-01T10:00:00Z")
                .with_metadata("title", "Hello")
                .with_metadata("lang", "en"),
            Document::new("p2", DocType::Post, "second post")
                .with_metadata("created_at", "2024-03-02T09:30:00Z")
                .with_metadata("lang", "fr"),
            Document::new("n1", DocType::Note, "a note").with_metadata("lang", "en"),
        ]
    }

    async fn seeded() -> (TempDir, SqliteCorpusStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteCorpusStore::open(dir.path().join("corpus.sqlite")).unwrap();
        store.upsert_documents(&corpus_docs()).await.unwrap();
        (dir, store)
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fetch_splits_columns_from_attributes() {
        let (_dir, store) = seeded().await;
        let records = store.fetch(&ids(&["p1", "missing"]), None).await.unwrap();

        assert_eq!(records.len(), 1);
        let p1 = &records["p1"];
        assert_eq!(p1.doc_type, DocType::Post);
        assert_eq!(p1.title.as_deref(), Some("Hello"));
        assert_eq!(p1.created_day(), Some("2024-03-01"));
        assert_eq!(p1.attributes["lang"], "en");
        assert!(!p1.attributes.contains_key("title"));
    }

    #[tokio::test]
    async fn test_fetch_applies_column_and_attribute_filters() {
        let (_dir, store) = seeded().await;
        let all = ids(&["p1", "p2", "n1"]);

        let posts = store
            .fetch(&all, Some(&MetadataFilter::eq("doc_type", "post")))
            .await
            .unwrap();
        assert_eq!(posts.len(), 2);

        let english = store
            .fetch(&all, Some(&MetadataFilter::eq("lang", "en")))
            .await
            .unwrap();
        let mut keys: Vec<&String> = english.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["n1", "p1"]);
    }

    #[tokio::test]
    async fn test_unknown_attribute_rejected() {
        let (_dir, store) = seeded().await;
        let err = store
            .fetch(&ids(&["p1"]), Some(&MetadataFilter::eq("author", "x")))
            .await
            .unwrap_err();
        assert!(matches!(err, CorpusError::UnknownField(f) if f == "author"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_rows() {
        let (_dir, store) = seeded().await;
        let updated = Document::new("p2", DocType::Note, "").with_metadata("title", "Renamed");
        store.upsert_documents(&[updated]).await.unwrap();

        let records = store.fetch(&ids(&["p2"]), None).await.unwrap();
        assert_eq!(records["p2"].doc_type, DocType::Note);
        assert_eq!(records["p2"].title.as_deref(), Some("Renamed"));
        assert!(records["p2"].attributes.is_empty());
    }

    #[test]
    fn test_attach_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SqliteCorpusStore::at(dir.path().join("nope.sqlite")),
            Err(CorpusError::NotFound(_))
        ));
    }
}
