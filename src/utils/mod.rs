//! Utility modules.

pub mod file;
pub mod retry;

pub use file::{calculate_checksum, collect_document_files, parse_documents, read_documents};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
