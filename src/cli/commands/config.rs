use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::GlobalOptions;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a config file with default values")]
    Init {
        #[arg(long, short = 'f', help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show current configuration")]
    Show,
    #[command(about = "Show configuration file path")]
    Path,
    #[command(about = "Set one value, e.g. `config set search.default_top_k 10`")]
    Set {
        #[arg(required = true, help = "Dotted key: section.field")]
        key: String,
        #[arg(required = true, help = "New value (TOML literal or plain string)")]
        value: String,
    },
}

pub async fn handle_config(cmd: ConfigCommand, opts: &GlobalOptions) -> Result<()> {
    match cmd {
        ConfigCommand::Init { force } => handle_init(force, opts),
        ConfigCommand::Show => handle_show(opts),
        ConfigCommand::Path => handle_path(opts),
        ConfigCommand::Set { key, value } => handle_set(&key, &value, opts),
    }
}

fn handle_init(force: bool, opts: &GlobalOptions) -> Result<()> {
    let formatter = get_formatter(opts.format);
    let path = opts.config_file()?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::default()
        .save_to(&path)
        .context("failed to write config")?;
    println!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

fn handle_show(opts: &GlobalOptions) -> Result<()> {
    let mut config = opts.load_config()?;
    if config.vector_store.api_key.is_some() {
        config.vector_store.api_key = Some("********".to_string());
    }

    if opts.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Ok(path) = opts.config_file() {
        let state = if path.exists() { "" } else { " (not created, showing defaults)" };
        println!("# Config: {}{state}", path.display());
        println!();
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn handle_path(opts: &GlobalOptions) -> Result<()> {
    let path = opts.config_file()?;
    if path.exists() {
        println!("Config (active): {}", path.display());
    } else {
        println!("Config (would be): {}", path.display());
    }

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        }
    }
    Ok(())
}

fn handle_set(key: &str, value: &str, opts: &GlobalOptions) -> Result<()> {
    let formatter = get_formatter(opts.format);
    let path = opts.config_file()?;

    let mut table = load_table(&path)?;
    set_dotted(&mut table, key, parse_value(value))?;

    let config: Config = toml::Value::Table(table)
        .try_into()
        .with_context(|| format!("invalid value for {key}"))?;
    config.validate()?;
    config.save_to(&path).context("failed to write config")?;

    println!(
        "{}",
        formatter.format_message(&format!("Set {key} = {value} in {}", path.display()))
    );
    Ok(())
}

fn load_table(path: &Path) -> Result<toml::Table> {
    if !path.exists() {
        let defaults = toml::to_string(&Config::default())?;
        return Ok(defaults.parse()?);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content.parse()?)
}

/// TOML literal when it parses as one, otherwise a bare string.
fn parse_value(raw: &str) -> toml::Value {
    format!("value = {raw}")
        .parse::<toml::Table>()
        .ok()
        .and_then(|mut t| t.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn set_dotted(table: &mut toml::Table, key: &str, value: toml::Value) -> Result<()> {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(leaf) = parts.pop().filter(|leaf| !leaf.is_empty()) else {
        anyhow::bail!("empty config key");
    };

    let mut current = table;
    for part in parts {
        current = current
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .with_context(|| format!("{part} is not a section"))?;
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_literals() {
        assert_eq!(parse_value("10"), toml::Value::Integer(10));
        assert_eq!(parse_value("0.5"), toml::Value::Float(0.5));
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("qdrant"), toml::Value::String("qdrant".to_string()));
    }

    #[test]
    fn test_set_dotted_produces_valid_config() {
        let mut table: toml::Table = toml::to_string(&Config::default())
            .unwrap()
            .parse()
            .unwrap();
        set_dotted(&mut table, "search.default_top_k", parse_value("7")).unwrap();
        set_dotted(&mut table, "vector_store.driver", parse_value("qdrant")).unwrap();

        let config: Config = toml::Value::Table(table).try_into().unwrap();
        assert_eq!(config.search.default_top_k, 7);
        assert_eq!(config.vector_store.driver, crate::models::VectorDriver::Qdrant);
    }

    #[test]
    fn test_set_rejects_non_section_path() {
        let mut table = toml::Table::new();
        table.insert("flat".to_string(), toml::Value::Integer(1));
        assert!(set_dotted(&mut table, "flat.inner", toml::Value::Integer(2)).is_err());
    }
}
