//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.taskq/config.toml`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

/// Keys the CLI reads back.
pub const KNOWN_KEYS: &[&str] = &["api-url", "wait-interval", "wait-timeout"];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key (api-url, wait-interval, wait-timeout)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Persistent CLI configuration stored on disk.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl CliConfig {
    /// Load from `path`, returning defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save to `path`, creating the directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Validate and store a value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "api-url" => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    anyhow::bail!("api-url must start with http:// or https://");
                }
            }
            "wait-interval" | "wait-timeout" => {
                humantime::parse_duration(value)
                    .with_context(|| format!("{} must be a duration such as 1s or 2m", key))?;
            }
            _ => anyhow::bail!("Unknown key '{}'. Known keys: {}", key, KNOWN_KEYS.join(", ")),
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".taskq").join("config.toml"))
}

fn load_config() -> Result<CliConfig> {
    CliConfig::load_from(&config_path()?)
}

/// Load a stored value, if set. Read errors count as unset.
pub fn load_value(key: &str) -> Option<String> {
    load_config().ok().and_then(|cfg| cfg.values.get(key).cloned())
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            let path = config_path()?;
            let mut cfg = CliConfig::load_from(&path)?;
            cfg.set(&key, &value)?;
            cfg.save_to(&path)?;

            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, value)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Get { key } => {
            let cfg = load_config()?;
            let value = cfg
                .values
                .get(&key)
                .with_context(|| format!("Key '{}' not set", key))?;
            match format {
                OutputFormat::Table => println!("{}", value),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Show => {
            let cfg = load_config()?;

            if cfg.values.is_empty() {
                output::print_info("No configuration values set.");
                return Ok(());
            }

            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for (k, v) in &cfg.values {
                        output::print_detail(k, v);
                    }
                }
                _ => output::print_item(&cfg.values, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will reset all CLI configuration. Use --force to confirm.");
                return Ok(());
            }

            let path = config_path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }

            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert_eq!(CliConfig::load_from(&path).unwrap(), CliConfig::default());

        let mut cfg = CliConfig::default();
        cfg.set("api-url", "http://taskq.internal:8000").unwrap();
        cfg.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded.values["api-url"], "http://taskq.internal:8000");
    }

    #[test]
    fn test_set_validates_keys_and_values() {
        let mut cfg = CliConfig::default();
        assert!(cfg.set("colour", "red").is_err());
        assert!(cfg.set("api-url", "localhost:8000").is_err());
        assert!(cfg.set("wait-timeout", "soon").is_err());
        cfg.set("wait-timeout", "2m").unwrap();
        assert_eq!(cfg.values.len(), 1);
    }
}
