use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::GlobalOptions;
use crate::cli::commands::index::open_session;
use crate::cli::output::get_formatter;
use crate::models::{MetadataFilter, QueryRequest, Similarity};
use crate::services::{CorpusField, HybridQuery};

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'n', help = "Maximum number of results to return")]
    pub limit: Option<usize>,

    #[arg(long, help = "Minimum similarity score threshold (0.0-1.0)")]
    pub min_score: Option<f32>,

    #[arg(
        long = "where",
        short = 'w',
        value_name = "FIELD=VALUE",
        help = "Chunk metadata filter (repeatable, all must match)"
    )]
    pub filters: Vec<MetadataFilter>,

    #[arg(long, help = "Only documents of this type (joins the corpus store)")]
    pub doc_type: Option<String>,

    #[arg(
        long,
        value_name = "FIELD",
        help = "Group hits by doc_type, created_day or an attribute (joins the corpus store)"
    )]
    pub group_by: Option<CorpusField>,

    #[arg(long, help = "Collection to search (defaults to the configured one)")]
    pub collection: Option<String>,
}

pub async fn handle_search(args: SearchArgs, opts: &GlobalOptions) -> Result<()> {
    let query = args.query.trim().to_string();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let session = open_session(opts, args.collection).await?;
    let formatter = get_formatter(opts.format);
    let start_time = Instant::now();
    let search = &session.config().search;

    let mut request = QueryRequest::new(&query, args.limit.unwrap_or(search.default_top_k));
    if let Some(score) = args.min_score {
        let threshold = Similarity::try_new(score).map_err(|e| anyhow::anyhow!(e))?;
        request = request.with_min_similarity(threshold);
    }
    if let Some(filter) = MetadataFilter::all(args.filters) {
        request = request.with_filter(filter);
    }

    if opts.verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Limit: {}", request.top_k);
        eprintln!("  Collection: {}", session.collection());
        if let Some(threshold) = request.min_similarity {
            eprintln!("  Min score: {threshold}");
        }
    }

    let hybrid = args.doc_type.is_some() || args.group_by.is_some();
    if !hybrid {
        let response = session
            .retriever()
            .query(&request)
            .await
            .context("search failed")?;
        let duration_ms = start_time.elapsed().as_millis() as u64;
        print!("{}", formatter.format_query_response(&query, &response, duration_ms));
        return Ok(());
    }

    let corpus = session
        .corpus_store()?
        .context("--doc-type and --group-by need [corpus] path in the config")?;
    let corpus_filter = args
        .doc_type
        .map(|doc_type| MetadataFilter::eq("doc_type", doc_type.to_lowercase()));
    let hybrid_query = HybridQuery::new(request)
        .with_corpus_filter(corpus_filter)
        .group_by(args.group_by);

    let response = session
        .hybrid(Arc::new(corpus))
        .query(&hybrid_query)
        .await
        .context("hybrid search failed")?;
    let duration_ms = start_time.elapsed().as_millis() as u64;
    print!("{}", formatter.format_hybrid_response(&query, &response, duration_ms));

    Ok(())
}
