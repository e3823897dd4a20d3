//! Embedded vector store backed by a single SQLite file.
//!
//! Writes are serialized through one connection and committed one batch per
//! transaction. Every read opens its own read-only connection, so queries run
//! alongside writes and only ever observe committed batches (WAL mode).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};

use super::{
    BUILTIN_FIELDS, CollectionInfo, VectorQuery, VectorStore, check_filter, finalize_hits,
    validate_collection_name,
};
use crate::error::VectorStoreError;
use crate::models::{DistanceMetric, IndexEntry, Metadata, ScoredChunk, Similarity};
use crate::services::sql_filter::{self, SqlFields};

/// File name of the database inside the storage root.
pub const DATABASE_FILE: &str = "vectors.sqlite";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    metric TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    collection TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    document_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL,
    vector BLOB NOT NULL,
    checksum TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(collection, document_id);

CREATE TABLE IF NOT EXISTS collection_fields (
    collection TEXT NOT NULL,
    field TEXT NOT NULL,
    PRIMARY KEY (collection, field)
);
"#;

// The WHERE clause turns a no-op replacement into zero changed rows.
const UPSERT_CHUNK: &str = r#"
INSERT INTO chunks (collection, chunk_id, document_id, chunk_index, text, metadata, vector, checksum, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT (collection, chunk_id) DO UPDATE SET
    document_id = excluded.document_id,
    chunk_index = excluded.chunk_index,
    text = excluded.text,
    metadata = excluded.metadata,
    vector = excluded.vector,
    checksum = excluded.checksum,
    updated_at = excluded.updated_at
WHERE chunks.checksum != excluded.checksum OR chunks.vector != excluded.vector
"#;

const DELETE_CHUNK: &str = "DELETE FROM chunks WHERE collection = ?1 AND chunk_id = ?2";

const CHUNK_FIELDS: SqlFields<'static> = SqlFields {
    columns: &BUILTIN_FIELDS,
    json_column: "metadata",
};

const SELECT_COLLECTION: &str = r#"
SELECT c.name, c.dimension, c.metric,
       (SELECT COUNT(*) FROM chunks WHERE collection = c.name)
FROM collections c
"#;

/// SQLite vector store rooted at one directory.
pub struct LocalVectorStore {
    path: PathBuf,
    writer: Arc<Mutex<Connection>>,
    metric: DistanceMetric,
}

impl LocalVectorStore {
    /// Open (or create) the store under `root`. New collections get `metric`;
    /// existing ones keep the metric they were created with.
    pub fn open(root: &Path, metric: DistanceMetric) -> Result<Self, VectorStoreError> {
        std::fs::create_dir_all(root)?;
        let path = root.join(DATABASE_FILE);

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!(path = %path.display(), "opened local vector store");

        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(conn)),
            metric,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` on the single writer connection.
    async fn write<T, F>(&self, op: F) -> Result<T, VectorStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, VectorStoreError> + Send + 'static,
    {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let mut conn = writer
                .lock()
                .map_err(|_| VectorStoreError::Storage("writer lock poisoned".to_string()))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| VectorStoreError::Storage(format!("storage task failed: {e}")))?
    }

    /// Run `op` on a fresh read-only connection.
    async fn read<T, F>(&self, op: F) -> Result<T, VectorStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, VectorStoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_reader(&path)?;
            op(&conn)
        })
        .await
        .map_err(|e| VectorStoreError::Storage(format!("storage task failed: {e}")))?
    }
}

fn open_reader(path: &Path) -> Result<Connection, VectorStoreError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn collection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn build_info(
    (name, dimension, metric, count): (String, i64, String, i64),
) -> Result<CollectionInfo, VectorStoreError> {
    let metric = metric
        .parse::<DistanceMetric>()
        .map_err(VectorStoreError::Storage)?;
    Ok(CollectionInfo {
        name,
        dimension: dimension as usize,
        metric,
        points_count: count as u64,
    })
}

fn load_collection(
    conn: &Connection,
    name: &str,
) -> Result<Option<CollectionInfo>, VectorStoreError> {
    conn.query_row(
        &format!("{SELECT_COLLECTION} WHERE c.name = ?1"),
        params![name],
        collection_from_row,
    )
    .optional()?
    .map(build_info)
    .transpose()
}

fn known_fields(conn: &Connection, name: &str) -> Result<HashSet<String>, VectorStoreError> {
    let mut stmt = conn.prepare("SELECT field FROM collection_fields WHERE collection = ?1")?;
    let fields = stmt
        .query_map(params![name], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(fields)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(blob: &[u8], dimension: usize) -> Result<Vec<f32>, VectorStoreError> {
    if blob.len() != dimension * std::mem::size_of::<f32>() {
        return Err(VectorStoreError::InvalidVector(format!(
            "stored vector has {} bytes, expected {}",
            blob.len(),
            dimension * std::mem::size_of::<f32>()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Whole-batch validation, before anything is written.
fn validate_entries(entries: &[IndexEntry], dimension: usize) -> Result<(), VectorStoreError> {
    for entry in entries {
        if entry.vector.len() != dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: dimension,
                actual: entry.vector.len(),
            });
        }
        if entry.vector.iter().any(|v| !v.is_finite()) {
            return Err(VectorStoreError::InvalidVector(format!(
                "non-finite component in chunk {}",
                entry.chunk_id
            )));
        }
    }
    Ok(())
}

/// Upsert `entries` and delete `stale` in one transaction.
fn write_chunks(
    conn: &mut Connection,
    name: &str,
    entries: &[IndexEntry],
    stale: &[String],
) -> Result<(u64, u64), VectorStoreError> {
    let info = load_collection(conn, name)?
        .ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))?;
    validate_entries(entries, info.dimension)?;

    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    let mut written = 0u64;
    let mut pruned = 0u64;
    {
        let mut upsert = tx.prepare_cached(UPSERT_CHUNK)?;
        let mut register = tx.prepare_cached(
            "INSERT OR IGNORE INTO collection_fields (collection, field) VALUES (?1, ?2)",
        )?;
        let mut registered: HashSet<&str> = HashSet::new();

        for entry in entries {
            let metadata = serde_json::to_string(&entry.metadata)
                .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;
            written += upsert.execute(params![
                name,
                entry.chunk_id,
                entry.document_id,
                i64::from(entry.chunk_index),
                entry.text,
                metadata,
                encode_vector(&entry.vector),
                entry.checksum,
                now,
            ])? as u64;

            for key in entry.metadata.keys() {
                if registered.insert(key.as_str()) {
                    register.execute(params![name, key])?;
                }
            }
        }

        let mut delete = tx.prepare_cached(DELETE_CHUNK)?;
        for id in stale {
            pruned += delete.execute(params![name, id])? as u64;
        }
    }
    tx.commit()?;
    Ok((written, pruned))
}

struct Candidate {
    chunk_id: String,
    document_id: String,
    text: String,
    metadata: String,
    raw: f32,
    score: Similarity,
}

fn prune(candidates: &mut Vec<Candidate>, metric: DistanceMetric, keep: usize) {
    candidates.sort_by(|a, b| {
        metric
            .rank(a.raw, b.raw)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(keep);
}

/// Exhaustive scan keeping only the best `top_k` rows in memory.
fn scan(
    conn: &Connection,
    info: &CollectionInfo,
    query: &VectorQuery,
) -> Result<Vec<ScoredChunk>, VectorStoreError> {
    let mut params = vec![SqlValue::Text(info.name.clone())];
    let mut sql = String::from(
        "SELECT chunk_id, document_id, text, metadata, vector FROM chunks WHERE collection = ?",
    );
    if let Some(filter) = &query.filter {
        sql.push_str(" AND ");
        sql.push_str(&sql_filter::translate(filter, &CHUNK_FIELDS, &mut params));
    }

    let metric = info.metric;
    let bound = query.top_k.saturating_mul(2).max(64);
    let mut candidates: Vec<Candidate> = Vec::new();

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let blob: Vec<u8> = row.get(4)?;
        let vector = decode_vector(&blob, info.dimension)?;
        let raw = metric.raw_score(&query.vector, &vector);
        let score = metric.similarity(raw);
        if query.min_similarity.is_some_and(|t| score < t) {
            continue;
        }

        candidates.push(Candidate {
            chunk_id: row.get(0)?,
            document_id: row.get(1)?,
            text: row.get(2)?,
            metadata: row.get(3)?,
            raw,
            score,
        });
        if candidates.len() > bound {
            prune(&mut candidates, metric, query.top_k);
        }
    }

    let hits = candidates
        .into_iter()
        .map(|c| {
            let metadata: Metadata = serde_json::from_str(&c.metadata)
                .map_err(|e| VectorStoreError::Storage(format!("corrupt metadata: {e}")))?;
            let hit = ScoredChunk {
                chunk_id: c.chunk_id,
                document_id: c.document_id,
                text: c.text,
                metadata,
                score: c.score,
            };
            Ok((c.raw, hit))
        })
        .collect::<Result<Vec<_>, VectorStoreError>>()?;

    Ok(finalize_hits(metric, hits, query.top_k, query.min_similarity))
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.write(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(true)
        })
        .await
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        validate_collection_name(name)?;
        if dimension == 0 {
            return Err(VectorStoreError::CollectionError(
                "dimension must be at least 1".to_string(),
            ));
        }

        let name = name.to_string();
        let metric = self.metric;
        self.write(move |conn| {
            if let Some(info) = load_collection(conn, &name)? {
                if info.dimension != dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: info.dimension,
                        actual: dimension,
                    });
                }
                return Ok(());
            }

            conn.execute(
                "INSERT INTO collections (name, dimension, metric, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    name,
                    dimension as i64,
                    metric.to_string(),
                    chrono::Utc::now().to_rfc3339()
                ],
            )?;
            tracing::debug!(collection = %name, dimension, %metric, "created collection");
            Ok(())
        })
        .await
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, VectorStoreError> {
        validate_collection_name(name)?;
        let name = name.to_string();
        self.write(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chunks WHERE collection = ?1", params![name])?;
            tx.execute(
                "DELETE FROM collection_fields WHERE collection = ?1",
                params![name],
            )?;
            let removed = tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, VectorStoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLLECTION} ORDER BY c.name"))?;
            let rows = stmt
                .query_map([], collection_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(build_info).collect()
        })
        .await
    }

    async fn collection_info(
        &self,
        name: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        validate_collection_name(name)?;
        let name = name.to_string();
        self.read(move |conn| load_collection(conn, &name)).await
    }

    async fn upsert(&self, name: &str, entries: Vec<IndexEntry>) -> Result<u64, VectorStoreError> {
        validate_collection_name(name)?;
        if entries.is_empty() {
            return Ok(0);
        }

        let name = name.to_string();
        self.write(move |conn| write_chunks(conn, &name, &entries, &[]).map(|(written, _)| written))
            .await
    }

    async fn replace_chunks(
        &self,
        name: &str,
        entries: Vec<IndexEntry>,
        stale: &[String],
    ) -> Result<(u64, u64), VectorStoreError> {
        validate_collection_name(name)?;
        if entries.is_empty() && stale.is_empty() {
            return Ok((0, 0));
        }

        let name = name.to_string();
        let stale = stale.to_vec();
        self.write(move |conn| write_chunks(conn, &name, &entries, &stale))
            .await
    }

    async fn query(
        &self,
        name: &str,
        query: &VectorQuery,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        validate_collection_name(name)?;
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let name = name.to_string();
        let query = query.clone();
        self.read(move |conn| {
            let Some(info) = load_collection(conn, &name)? else {
                return Ok(Vec::new());
            };
            if info.points_count == 0 {
                return Ok(Vec::new());
            }
            if query.vector.len() != info.dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: info.dimension,
                    actual: query.vector.len(),
                });
            }
            let fields = known_fields(conn, &name)?;
            check_filter(query.filter.as_ref(), |f| fields.contains(f))?;

            scan(conn, &info, &query)
        })
        .await
    }

    async fn delete_by_document(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<u64, VectorStoreError> {
        validate_collection_name(name)?;
        let (name, document_id) = (name.to_string(), document_id.to_string());
        self.write(move |conn| {
            let removed = conn.execute(
                "DELETE FROM chunks WHERE collection = ?1 AND document_id = ?2",
                params![name, document_id],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn delete_chunks(
        &self,
        name: &str,
        chunk_ids: &[String],
    ) -> Result<u64, VectorStoreError> {
        validate_collection_name(name)?;
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let name = name.to_string();
        let chunk_ids = chunk_ids.to_vec();
        self.write(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0u64;
            {
                let mut stmt = tx.prepare_cached(DELETE_CHUNK)?;
                for id in &chunk_ids {
                    removed += stmt.execute(params![name, id])? as u64;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn chunk_fingerprints(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<HashMap<String, String>, VectorStoreError> {
        validate_collection_name(name)?;
        let (name, document_id) = (name.to_string(), document_id.to_string());
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_id, checksum FROM chunks WHERE collection = ?1 AND document_id = ?2",
            )?;
            let fingerprints = stmt
                .query_map(params![name, document_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok(fingerprints)
        })
        .await
    }

    async fn list_documents(&self, name: &str) -> Result<Vec<(String, u64)>, VectorStoreError> {
        validate_collection_name(name)?;
        let name = name.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT document_id, COUNT(*) FROM chunks WHERE collection = ?1
                 GROUP BY document_id ORDER BY document_id",
            )?;
            let documents = stmt
                .query_map(params![name], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(documents)
        })
        .await
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
