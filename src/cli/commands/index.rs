//! Index command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::GlobalOptions;
use crate::cli::output::get_formatter;
use crate::services::{IndexSession, SqliteCorpusStore};
use crate::utils::file::read_documents;

#[derive(Debug, Subcommand)]
pub enum IndexCommand {
    /// Index documents from a JSON/JSONL file or a directory of them
    Add {
        /// Path to a document file or directory
        #[arg(required = true)]
        path: PathBuf,

        /// Collection to write to (defaults to the configured one)
        #[arg(long)]
        collection: Option<String>,

        /// Show what would be indexed without actually indexing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete documents and all of their chunks
    Delete {
        /// Document ids to remove
        #[arg(required = true)]
        document_ids: Vec<String>,

        #[arg(long)]
        collection: Option<String>,
    },

    /// Drop the whole collection
    Clear {
        #[arg(long)]
        collection: Option<String>,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },
}

pub async fn handle_index(cmd: IndexCommand, opts: &GlobalOptions) -> Result<()> {
    match cmd {
        IndexCommand::Add {
            path,
            collection,
            dry_run,
        } => handle_add(path, collection, dry_run, opts).await,
        IndexCommand::Delete {
            document_ids,
            collection,
        } => handle_delete(document_ids, collection, opts).await,
        IndexCommand::Clear { collection, force } => handle_clear(collection, force, opts).await,
    }
}

/// Session for `collection`, or the configured collection.
pub(crate) async fn open_session(
    opts: &GlobalOptions,
    collection: Option<String>,
) -> Result<IndexSession> {
    let config = opts.load_config()?;
    let session = IndexSession::from_config(config)
        .await
        .context("failed to initialize services")?;
    match collection {
        Some(name) => Ok(session.with_collection(name)?),
        None => Ok(session),
    }
}

async fn handle_add(
    path: PathBuf,
    collection: Option<String>,
    dry_run: bool,
    opts: &GlobalOptions,
) -> Result<()> {
    let formatter = get_formatter(opts.format);

    if !path.exists() {
        anyhow::bail!("path does not exist: {}", path.display());
    }
    let documents = read_documents(&path)
        .with_context(|| format!("failed to read documents from {}", path.display()))?;

    if documents.is_empty() {
        println!("{}", formatter.format_message("No documents found to index."));
        return Ok(());
    }

    if opts.verbose {
        eprintln!("Found {} documents", documents.len());
    }

    if dry_run {
        println!(
            "{}",
            formatter.format_message(&format!(
                "Dry run: Would index {} documents",
                documents.len()
            ))
        );
        for doc in &documents {
            println!("  {} ({})", doc.document_id, doc.doc_type);
        }
        return Ok(());
    }

    let session = open_session(opts, collection).await?;

    if let Some(corpus_path) = &session.config().corpus.path {
        let corpus = SqliteCorpusStore::open(corpus_path)
            .with_context(|| format!("failed to open corpus at {}", corpus_path.display()))?;
        let recorded = corpus.upsert_documents(&documents).await?;
        tracing::debug!(recorded, path = %corpus_path.display(), "recorded corpus rows");
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!(
        "Indexing {} documents into {}",
        documents.len(),
        session.collection()
    ));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = session.indexer().reindex(documents).await;
    pb.finish_and_clear();
    let report = result.context("indexing aborted")?;

    print!("{}", formatter.format_index_report(&report));
    if report.has_failures() {
        eprintln!(
            "Warning: {} document(s) failed to index; run with --verbose for details",
            report.failed
        );
    }

    Ok(())
}

async fn handle_delete(
    document_ids: Vec<String>,
    collection: Option<String>,
    opts: &GlobalOptions,
) -> Result<()> {
    let formatter = get_formatter(opts.format);
    let session = open_session(opts, collection).await?;
    let indexer = session.indexer();

    let mut removed = 0;
    for id in &document_ids {
        let count = indexer.delete_document(id).await?;
        if opts.verbose {
            eprintln!("{id}: {count} chunks removed");
        }
        removed += count;
    }

    println!(
        "{}",
        formatter.format_message(&format!(
            "Deleted {} document(s), {removed} chunk(s) from {}",
            document_ids.len(),
            session.collection()
        ))
    );

    Ok(())
}

async fn handle_clear(collection: Option<String>, force: bool, opts: &GlobalOptions) -> Result<()> {
    let formatter = get_formatter(opts.format);
    let session = open_session(opts, collection).await?;

    if !force {
        println!(
            "This will delete ALL chunks in '{}'. Continue? [y/N]",
            session.collection()
        );
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", formatter.format_message("Cancelled."));
            return Ok(());
        }
    }

    let existed = session.indexer().clear().await?;
    let message = if existed {
        format!("Collection '{}' has been cleared.", session.collection())
    } else {
        format!("Collection '{}' did not exist.", session.collection())
    };
    println!("{}", formatter.format_message(&message));

    Ok(())
}
