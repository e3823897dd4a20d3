use anyhow::Result;

use crate::cli::GlobalOptions;
use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::VectorDriver;
use crate::services::create_backend;

pub async fn handle_status(opts: &GlobalOptions) -> Result<()> {
    let config = opts.load_config()?;
    let formatter = get_formatter(opts.format);

    let (vector_store_connected, collections) = match create_backend(&config.vector_store).await {
        Ok(store) => {
            let connected = store.health_check().await.unwrap_or(false);
            let collections = if connected {
                store.list_collections().await.unwrap_or_default()
            } else {
                Vec::new()
            };
            (connected, collections)
        }
        Err(e) => {
            tracing::debug!(error = %e, "vector store unavailable");
            (false, Vec::new())
        }
    };

    let vector_store_location = match config.vector_store.driver {
        VectorDriver::Local => config
            .vector_store
            .storage_root()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "(unknown)".to_string()),
        VectorDriver::Qdrant => config.vector_store.url.clone(),
    };

    let status = StatusInfo {
        embedding_protocol: config.embedding.protocol.to_string(),
        embedding_url: config.embedding.url.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_dimension: config.embedding.dimension,
        vector_store_driver: config.vector_store.driver.to_string(),
        vector_store_location,
        vector_store_connected,
        collection: config.vector_store.collection.clone(),
        collections,
        corpus_path: config
            .corpus
            .path
            .as_ref()
            .map(|p| p.display().to_string()),
    };

    print!("{}", formatter.format_status(&status));

    if !vector_store_connected {
        eprintln!();
        match config.vector_store.driver {
            VectorDriver::Qdrant => {
                eprintln!("Warning: Qdrant not reachable at {}", config.vector_store.url);
            }
            VectorDriver::Local => {
                eprintln!("Warning: local vector store could not be opened");
            }
        }
    }

    Ok(())
}
