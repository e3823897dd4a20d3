use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::models::{IndexReport, OutputFormat, QueryResponse};
use crate::services::{CollectionInfo, HybridResponse};

const PREVIEW_CHARS: usize = 200;

pub trait Formatter {
    fn format_query_response(&self, query: &str, response: &QueryResponse, duration_ms: u64)
    -> String;
    fn format_hybrid_response(
        &self,
        query: &str,
        response: &HybridResponse,
        duration_ms: u64,
    ) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_index_report(&self, report: &IndexReport) -> String;
    fn format_collections(&self, collections: &[CollectionInfo]) -> String;
    fn format_documents(&self, collection: &str, documents: &[(String, u64)]) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding_protocol: String,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub vector_store_driver: String,
    pub vector_store_location: String,
    pub vector_store_connected: bool,
    pub collection: String,
    pub collections: Vec<CollectionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<String>,
}

/// Run `write` against a fresh buffer. Writing to a `String` cannot fail.
fn render(write: impl FnOnce(&mut String) -> std::fmt::Result) -> String {
    let mut output = String::new();
    let _ = write(&mut output);
    output
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        format!("{head}...")
    } else {
        head
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_query_response(
        &self,
        query: &str,
        response: &QueryResponse,
        duration_ms: u64,
    ) -> String {
        if response.is_empty() {
            return format!("No results found for: {query}\n");
        }

        render(|out| {
            writeln!(out, "Search results for: \"{query}\"")?;
            writeln!(out, "Found {} results in {duration_ms}ms\n", response.len())?;
            for (i, hit) in response.hits.iter().enumerate() {
                writeln!(out, "{}. [Score: {}]", i + 1, hit.score)?;
                writeln!(out, "   Document: {}", hit.document_id)?;
                writeln!(out, "   ---")?;
                for line in preview(&hit.text).lines() {
                    writeln!(out, "   {line}")?;
                }
                writeln!(out)?;
            }
            Ok(())
        })
    }

    fn format_hybrid_response(
        &self,
        query: &str,
        response: &HybridResponse,
        duration_ms: u64,
    ) -> String {
        if response.hits.is_empty() {
            return format!("No results found for: {query}\n");
        }

        render(|out| {
            writeln!(out, "Search results for: \"{query}\"")?;
            writeln!(out, "Found {} results in {duration_ms}ms\n", response.hits.len())?;
            for (i, hit) in response.hits.iter().enumerate() {
                let doc = &hit.document;
                writeln!(out, "{}. [Score: {}]", i + 1, hit.chunk.score)?;
                write!(out, "   Document: {} ({})", doc.document_id, doc.doc_type)?;
                if let Some(day) = doc.created_day() {
                    write!(out, " {day}")?;
                }
                writeln!(out)?;
                if let Some(title) = &doc.title {
                    writeln!(out, "   Title: {title}")?;
                }
                writeln!(out, "   ---")?;
                for line in preview(&hit.chunk.text).lines() {
                    writeln!(out, "   {line}")?;
                }
                writeln!(out)?;
            }

            if !response.aggregates.is_empty() {
                writeln!(out, "Groups")?;
                writeln!(out, "------")?;
                for row in &response.aggregates {
                    writeln!(
                        out,
                        "  {:<20} {:>4} hits  best {:.3}  mean {:.3}",
                        row.key, row.count, row.best_score, row.mean_score
                    )?;
                }
            }
            Ok(())
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        render(|out| {
            writeln!(out, "Status")?;
            writeln!(out, "------")?;
            writeln!(out, "Embedding:     {} ({})", status.embedding_model, status.embedding_protocol)?;
            writeln!(out, "  URL:         {}", status.embedding_url)?;
            writeln!(out, "  Dimension:   {}", status.embedding_dimension)?;
            writeln!(out)?;

            let state = if status.vector_store_connected {
                "[CONNECTED]"
            } else {
                "[DISCONNECTED]"
            };
            writeln!(out, "Vector Store:  {} {state}", status.vector_store_driver)?;
            writeln!(out, "  Location:    {}", status.vector_store_location)?;
            writeln!(out, "  Collection:  {}", status.collection)?;
            for info in &status.collections {
                writeln!(
                    out,
                    "    {} ({} points, dim {}, {})",
                    info.name, info.points_count, info.dimension, info.metric
                )?;
            }
            if let Some(path) = &status.corpus_path {
                writeln!(out)?;
                writeln!(out, "Corpus:        {path}")?;
            }
            Ok(())
        })
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        render(|out| {
            writeln!(out, "Indexing Complete ({})", report.collection)?;
            writeln!(out, "-----------------")?;
            writeln!(out, "Documents seen:    {}", report.total())?;
            writeln!(out, "Indexed:           {}", report.indexed)?;
            writeln!(out, "Unchanged:         {}", report.unchanged)?;
            writeln!(out, "Skipped:           {}", report.skipped)?;
            writeln!(out, "Failed:            {}", report.failed)?;
            writeln!(out, "Chunks written:    {}", report.chunks_written)?;
            writeln!(out, "Chunks unchanged:  {}", report.chunks_unchanged)?;
            writeln!(out, "Chunks pruned:     {}", report.chunks_pruned)?;
            writeln!(out, "Duration:          {}ms", report.duration_ms)?;
            if !report.failures.is_empty() {
                writeln!(out, "\nFailures:")?;
                for failure in &report.failures {
                    writeln!(
                        out,
                        "  {} [{}] {}",
                        failure.document_id, failure.kind, failure.message
                    )?;
                }
            }
            Ok(())
        })
    }

    fn format_collections(&self, collections: &[CollectionInfo]) -> String {
        if collections.is_empty() {
            return "No collections found.\n".to_string();
        }
        render(|out| {
            writeln!(out, "Collections")?;
            writeln!(out, "-----------")?;
            for info in collections {
                writeln!(
                    out,
                    "  {} ({} points, dim {}, {})",
                    info.name, info.points_count, info.dimension, info.metric
                )?;
            }
            Ok(())
        })
    }

    fn format_documents(&self, collection: &str, documents: &[(String, u64)]) -> String {
        if documents.is_empty() {
            return format!("No documents indexed in {collection}.\n");
        }
        render(|out| {
            writeln!(out, "Documents in {collection}")?;
            writeln!(out, "-------------")?;
            for (id, chunks) in documents {
                writeln!(out, "  {id} ({chunks} chunks)")?;
            }
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("{message}\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {error}\n")
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        encoded.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_query_response(
        &self,
        query: &str,
        response: &QueryResponse,
        duration_ms: u64,
    ) -> String {
        self.encode(&serde_json::json!({
            "query": query,
            "duration_ms": duration_ms,
            "hits": response.hits,
        }))
    }

    fn format_hybrid_response(
        &self,
        query: &str,
        response: &HybridResponse,
        duration_ms: u64,
    ) -> String {
        self.encode(&serde_json::json!({
            "query": query,
            "duration_ms": duration_ms,
            "hits": response.hits,
            "aggregates": response.aggregates,
        }))
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.encode(status)
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        self.encode(report)
    }

    fn format_collections(&self, collections: &[CollectionInfo]) -> String {
        self.encode(&serde_json::json!({ "collections": collections }))
    }

    fn format_documents(&self, collection: &str, documents: &[(String, u64)]) -> String {
        let documents: Vec<serde_json::Value> = documents
            .iter()
            .map(|(id, chunks)| serde_json::json!({ "document_id": id, "chunks": chunks }))
            .collect();
        self.encode(&serde_json::json!({ "collection": collection, "documents": documents }))
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({ "error": error }).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_query_response(
        &self,
        query: &str,
        response: &QueryResponse,
        duration_ms: u64,
    ) -> String {
        if response.is_empty() {
            return format!("## No results found\n\nQuery: `{query}`\n");
        }

        render(|out| {
            writeln!(out, "## Search Results\n")?;
            writeln!(out, "**Query:** `{query}`\n")?;
            writeln!(out, "Found {} results in {duration_ms}ms\n", response.len())?;
            for (i, hit) in response.hits.iter().enumerate() {
                writeln!(out, "### {}. Score: {}\n", i + 1, hit.score)?;
                writeln!(out, "**Document:** `{}`\n", hit.document_id)?;
                writeln!(out, "```\n{}\n```\n", hit.text)?;
            }
            Ok(())
        })
    }

    fn format_hybrid_response(
        &self,
        query: &str,
        response: &HybridResponse,
        duration_ms: u64,
    ) -> String {
        if response.hits.is_empty() {
            return format!("## No results found\n\nQuery: `{query}`\n");
        }

        render(|out| {
            writeln!(out, "## Search Results\n")?;
            writeln!(out, "**Query:** `{query}`\n")?;
            writeln!(out, "Found {} results in {duration_ms}ms\n", response.hits.len())?;
            for (i, hit) in response.hits.iter().enumerate() {
                let doc = &hit.document;
                writeln!(out, "### {}. Score: {}\n", i + 1, hit.chunk.score)?;
                writeln!(out, "**Document:** `{}` ({})\n", doc.document_id, doc.doc_type)?;
                if let Some(title) = &doc.title {
                    writeln!(out, "**Title:** {title}\n")?;
                }
                writeln!(out, "```\n{}\n```\n", hit.chunk.text)?;
            }

            if !response.aggregates.is_empty() {
                writeln!(out, "## Groups\n")?;
                writeln!(out, "| Key | Hits | Best | Mean |")?;
                writeln!(out, "|-----|------|------|------|")?;
                for row in &response.aggregates {
                    writeln!(
                        out,
                        "| `{}` | {} | {:.3} | {:.3} |",
                        row.key, row.count, row.best_score, row.mean_score
                    )?;
                }
            }
            Ok(())
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        render(|out| {
            writeln!(out, "## Status\n")?;
            writeln!(out, "### Embedding\n")?;
            writeln!(out, "- **Model:** {}", status.embedding_model)?;
            writeln!(out, "- **Protocol:** {}", status.embedding_protocol)?;
            writeln!(out, "- **URL:** `{}`", status.embedding_url)?;
            writeln!(out, "- **Dimension:** {}\n", status.embedding_dimension)?;

            let state = if status.vector_store_connected { "✅" } else { "❌" };
            writeln!(out, "### Vector Store ({}) {state}\n", status.vector_store_driver)?;
            writeln!(out, "- **Location:** `{}`", status.vector_store_location)?;
            writeln!(out, "- **Collection:** {}", status.collection)?;
            if let Some(path) = &status.corpus_path {
                writeln!(out, "- **Corpus:** `{path}`")?;
            }
            Ok(())
        })
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        render(|out| {
            writeln!(out, "## Indexing Complete\n")?;
            writeln!(out, "| Metric | Value |")?;
            writeln!(out, "|--------|-------|")?;
            writeln!(out, "| Indexed | {} |", report.indexed)?;
            writeln!(out, "| Unchanged | {} |", report.unchanged)?;
            writeln!(out, "| Skipped | {} |", report.skipped)?;
            writeln!(out, "| Failed | {} |", report.failed)?;
            writeln!(out, "| Chunks written | {} |", report.chunks_written)?;
            writeln!(out, "| Chunks pruned | {} |", report.chunks_pruned)?;
            writeln!(out, "| Duration | {}ms |", report.duration_ms)?;
            for failure in &report.failures {
                writeln!(
                    out,
                    "\n- `{}` **{}**: {}",
                    failure.document_id, failure.kind, failure.message
                )?;
            }
            Ok(())
        })
    }

    fn format_collections(&self, collections: &[CollectionInfo]) -> String {
        if collections.is_empty() {
            return "## Collections\n\n*No collections found.*\n".to_string();
        }
        render(|out| {
            writeln!(out, "## Collections\n")?;
            writeln!(out, "| Name | Points | Dimension | Metric |")?;
            writeln!(out, "|------|--------|-----------|--------|")?;
            for info in collections {
                writeln!(
                    out,
                    "| `{}` | {} | {} | {} |",
                    info.name, info.points_count, info.dimension, info.metric
                )?;
            }
            Ok(())
        })
    }

    fn format_documents(&self, collection: &str, documents: &[(String, u64)]) -> String {
        render(|out| {
            writeln!(out, "## Documents in `{collection}`\n")?;
            if documents.is_empty() {
                return writeln!(out, "*No documents indexed.*");
            }
            writeln!(out, "| Document | Chunks |")?;
            writeln!(out, "|----------|--------|")?;
            for (id, chunks) in documents {
                writeln!(out, "| `{id}` | {chunks} |")?;
            }
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {message}\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {error}\n")
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}
