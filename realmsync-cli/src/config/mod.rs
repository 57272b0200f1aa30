//! Configuration file loading
//!
//! The config lives in a TOML file resolved from `--config`, then the
//! `REALMSYNC_CONFIG` environment variable, then
//! `~/.config/realmsync/config.toml`. A missing default file yields the
//! built-in defaults.

pub mod layout;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use layout::{TableLayout, TableSpec};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "REALMSYNC_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database name -> SQLite connection URL
    pub databases: BTreeMap<String, String>,
    pub compare: CompareSection,
    pub retry: RetrySection,
    /// Table layout overrides keyed by entity type (`npc`, `quest`, ...)
    pub layout: BTreeMap<String, TableSpecOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareSection {
    /// Upper bound of the comparison worker pool, 0 for unbounded
    pub max_concurrent: usize,
    pub counts_only: bool,
    /// Connections opened per database
    pub pool_size: u32,
}

impl Default for CompareSection {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            counts_only: false,
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Partial `[layout.<type>]` section; unset keys keep the default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSpecOverride {
    pub table: Option<String>,
    pub id_column: Option<String>,
    pub natural_key_column: Option<String>,
}

impl Config {
    /// Resolve the config path and load it
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let path = default_path();
        if path.exists() {
            Self::from_file(&path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        // Surface bad layout keys at load time rather than at promotion time
        config.table_layout()?;
        Ok(config)
    }

    /// Default table layout with the `[layout]` overrides applied
    pub fn table_layout(&self) -> Result<TableLayout> {
        let mut layout = TableLayout::default();
        for (key, spec) in &self.layout {
            let entity_type = key
                .parse()
                .with_context(|| format!("Unknown entity type '{}' in [layout]", key))?;
            layout.apply_override(entity_type, spec);
        }
        Ok(layout)
    }

    pub fn database_url(&self, name: &str) -> Option<&str> {
        self.databases.get(name).map(String::as_str)
    }
}

/// `~/.config/realmsync/config.toml`
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("realmsync")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [databases]
            dev = "sqlite://dev.db"
            prod = "sqlite://prod.db"

            [compare]
            max_concurrent = 2
            counts_only = true

            [retry]
            max_attempts = 5

            [layout.npc]
            table = "characters"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url("dev"), Some("sqlite://dev.db"));
        assert_eq!(config.compare.max_concurrent, 2);
        assert!(config.compare.counts_only);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 200);

        let layout = config.table_layout().unwrap();
        assert_eq!(layout.spec(EntityType::Npc).table, "characters");
        assert_eq!(layout.spec(EntityType::Npc).id_column, "id");
        assert_eq!(layout.spec(EntityType::Quest).table, "quests");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.databases.is_empty());
        assert_eq!(config.compare.max_concurrent, 4);
    }

    #[test]
    fn test_unknown_layout_type_rejected() {
        let result = Config::parse("[layout.dragon]\ntable = \"dragons\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let result = Config::from_file(Path::new("/nonexistent/realmsync.toml"));
        assert!(result.is_err());
    }
}
