use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use rag_index::cli::commands::{
    handle_collections, handle_config, handle_documents, handle_index, handle_search,
    handle_status,
};
use rag_index::cli::{Cli, Commands, GlobalOptions};
use rag_index::models::Config;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rag_index={default_level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let default_format = match &cli.config {
        Some(path) => Config::load_from(path).ok(),
        None => Config::load().ok(),
    }
    .map(|config| config.search.default_format)
    .unwrap_or_default();

    let opts = GlobalOptions {
        format: cli.format.unwrap_or(default_format),
        verbose: cli.verbose,
        config_path: cli.config,
    };

    tokio::select! {
        result = run_command(cli.command, &opts) => {
            result?;
        }
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, cleaning up...");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

async fn run_command(command: Commands, opts: &GlobalOptions) -> Result<()> {
    match command {
        Commands::Status => handle_status(opts).await,
        Commands::Index(cmd) => handle_index(cmd, opts).await,
        Commands::Search(args) => handle_search(args, opts).await,
        Commands::Collections(cmd) => handle_collections(cmd, opts).await,
        Commands::Documents(args) => handle_documents(args, opts).await,
        Commands::Config(cmd) => handle_config(cmd, opts).await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
