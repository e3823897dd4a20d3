use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::GlobalOptions;
use crate::cli::output::get_formatter;
use crate::services::create_backend;
use crate::services::vector_store::validate_collection_name;

#[derive(Debug, Subcommand)]
pub enum CollectionsCommand {
    /// List collections with their sizes
    List,

    /// Drop a collection and everything in it
    Drop {
        #[arg(required = true)]
        name: String,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct DocumentsArgs {
    /// Collection to list (defaults to the configured one)
    #[arg(long)]
    pub collection: Option<String>,
}

pub async fn handle_collections(cmd: CollectionsCommand, opts: &GlobalOptions) -> Result<()> {
    let config = opts.load_config()?;
    let formatter = get_formatter(opts.format);
    let store = create_backend(&config.vector_store)
        .await
        .context("failed to open vector store")?;

    match cmd {
        CollectionsCommand::List => {
            let collections = store.list_collections().await?;
            print!("{}", formatter.format_collections(&collections));
        }
        CollectionsCommand::Drop { name, force } => {
            validate_collection_name(&name)?;
            if !force {
                println!("This will delete collection '{name}'. Continue? [y/N]");
                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;
                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("{}", formatter.format_message("Cancelled."));
                    return Ok(());
                }
            }
            let message = if store.drop_collection(&name).await? {
                format!("Dropped collection '{name}'.")
            } else {
                format!("Collection '{name}' does not exist.")
            };
            println!("{}", formatter.format_message(&message));
        }
    }

    Ok(())
}

pub async fn handle_documents(args: DocumentsArgs, opts: &GlobalOptions) -> Result<()> {
    let config = opts.load_config()?;
    let formatter = get_formatter(opts.format);
    let collection = args
        .collection
        .unwrap_or_else(|| config.vector_store.collection.clone());
    validate_collection_name(&collection)?;

    let store = create_backend(&config.vector_store)
        .await
        .context("failed to open vector store")?;
    let documents = store.list_documents(&collection).await?;
    print!("{}", formatter.format_documents(&collection, &documents));

    Ok(())
}
