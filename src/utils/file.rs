//! Checksums and document file loading.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::ImportError;
use crate::models::Document;

/// Calculate SHA-256 checksum of content.
pub fn calculate_checksum(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    hex::encode(hash)
}

/// Check if a path looks like a JSON or JSONL document dump.
pub fn is_document_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| matches!(ext.as_str(), "json" | "jsonl" | "ndjson"))
}

/// Collect document files under `path` (or `path` itself), sorted for
/// reproducible runs.
pub fn collect_document_files(path: &Path) -> Result<Vec<PathBuf>, ImportError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| ImportError::IoError(e.into()))?;
        if entry.file_type().is_file() && is_document_file(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Parse documents from a JSON array, a single JSON object or JSONL text.
pub fn parse_documents(input: &str, origin: &str) -> Result<Vec<Document>, ImportError> {
    let input = input.trim();

    if input.is_empty() {
        return Ok(Vec::new());
    }

    if input.starts_with('[') {
        return serde_json::from_str(input).map_err(|source| ImportError::JsonParseError {
            path: origin.to_string(),
            line: source.line(),
            source,
        });
    }

    let mut documents = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let doc: Document =
            serde_json::from_str(line).map_err(|source| ImportError::JsonParseError {
                path: origin.to_string(),
                line: i + 1,
                source,
            })?;
        documents.push(doc);
    }

    Ok(documents)
}

/// Read and parse every document file under `path`.
pub fn read_documents(path: &Path) -> Result<Vec<Document>, ImportError> {
    let mut documents = Vec::new();
    for file in collect_document_files(path)? {
        let content = fs::read_to_string(&file)?;
        documents.extend(parse_documents(&content, &file.to_string_lossy())?);
    }

    for doc in &documents {
        if doc.document_id.trim().is_empty() {
            return Err(ImportError::ValidationError(
                "document_id cannot be empty".to_string(),
            ));
        }
    }

    Ok(documents)
}
