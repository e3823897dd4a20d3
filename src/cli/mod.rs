//! Command-line front end over the indexing library.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::models::{Config, OutputFormat};

/// Build and query a semantic index over a document corpus.
#[derive(Debug, Parser)]
#[command(name = "rag-index")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, short = 'c', global = true, help = "Use this config file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show embedding settings, vector store health and collections
    Status,

    /// Manage the index (add, delete, clear)
    #[command(subcommand)]
    Index(commands::IndexCommand),

    /// Search indexed content
    Search(commands::SearchArgs),

    /// Manage collections
    #[command(subcommand)]
    Collections(commands::CollectionsCommand),

    /// List indexed documents with their chunk counts
    Documents(commands::DocumentsArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub format: OutputFormat,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

impl GlobalOptions {
    /// Load the config named by `--config`, else the default one.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config_path {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Config::load().context("failed to load config"),
        }
    }

    /// File that `config init/set` write to.
    pub fn config_file(&self) -> Result<PathBuf> {
        self.config_path
            .clone()
            .or_else(Config::config_path)
            .context("could not determine config directory")
    }
}
