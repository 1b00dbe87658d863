//! Desk configuration read from `.ticketdesk/config.toml`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::merge::MergeOptions;
use crate::perform::BatchPolicy;

pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_CONFIG: &str = include_str!("../resources/config.toml");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeskConfig {
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rollback_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_true")]
    pub move_articles: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            move_articles: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_group")]
    pub default_group: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_group: default_group(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_group() -> String {
    "Users".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl DeskConfig {
    pub fn batch_policy(&self) -> BatchPolicy {
        if self.rules.rollback_on_error {
            BatchPolicy::Atomic
        } else {
            BatchPolicy::BestEffort
        }
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            move_articles: self.merge.move_articles,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ingest.default_group.trim().is_empty() {
            bail!("ingest.default_group must not be empty");
        }
        Ok(())
    }
}

/// Loads `config.toml` from the desk directory. A missing file yields the
/// defaults.
pub fn load_config(desk_dir: &Path) -> Result<DeskConfig> {
    let path = desk_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(DeskConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str::<DeskConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, DeskConfig::default());
        assert_eq!(config.batch_policy(), BatchPolicy::BestEffort);
        assert!(config.merge_options().move_articles);
        assert_eq!(config.ingest.default_group, "Users");
    }

    #[test]
    fn test_bundled_template_matches_defaults() {
        let config: DeskConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, DeskConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[rules]\nrollback_on_error = true\n\n[log]\nformat = \"json\"\n",
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.batch_policy(), BatchPolicy::Atomic);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");
        assert!(config.merge.move_articles);
    }

    #[test]
    fn test_invalid_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        std::fs::write(&path, "[log]\nformat = \"xml\"\n").unwrap();
        assert!(load_config(dir.path()).is_err());

        std::fs::write(&path, "[ingest]\ndefault_group = \" \"\n").unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("default_group"));
    }
}
