use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::{ContextSearchError, Result};

/// Configuration for the context searcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Search engine connection
    pub elasticsearch: ElasticsearchConfig,

    /// Search index naming and batching
    pub index: IndexConfig,

    /// Relational video store
    pub storage: StorageConfig,

    /// Log output
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster
    pub url: String,

    /// Basic auth user, if the cluster requires one
    pub username: Option<String>,

    pub password: Option<String>,

    /// Per-request timeout
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Alias that always points at the live index
    pub alias: String,

    /// Documents per bulk request during a full reindex
    pub bulk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A bare level (`debug`) or a full filter directive (`context_searcher=debug,warn`)
    pub level: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            alias: "videos".to_string(),
            bulk_size: 10_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("context-searcher.sqlite3"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Filter directive for the tracing subscriber
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("context_searcher={},warn", level)
        }
    }
}

impl Config {
    const CONFIG_PATHS: [&'static str; 3] = [
        "context-searcher.toml",
        "config/context-searcher.toml",
        "/etc/context-searcher/config.toml",
    ];

    /// Load configuration from the first readable config file, falling back
    /// to defaults. Environment variables override either.
    pub fn load() -> Result<Self> {
        for path in &Self::CONFIG_PATHS {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(mut config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        config.apply_env(|key| std::env::var(key).ok());
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from one specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config_str = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&config_str)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CONTEXT_SEARCHER_ES_URL") {
            self.elasticsearch.url = url;
        }

        if let Some(username) = lookup("CONTEXT_SEARCHER_ES_USERNAME") {
            self.elasticsearch.username = Some(username);
        }

        if let Some(password) = lookup("CONTEXT_SEARCHER_ES_PASSWORD") {
            self.elasticsearch.password = Some(password);
        }

        if let Some(alias) = lookup("CONTEXT_SEARCHER_INDEX_ALIAS") {
            self.index.alias = alias;
        }

        if let Some(bulk_size) = lookup("CONTEXT_SEARCHER_BULK_SIZE") {
            match bulk_size.parse() {
                Ok(bulk_size) => self.index.bulk_size = bulk_size,
                Err(_) => tracing::warn!(
                    "Ignoring CONTEXT_SEARCHER_BULK_SIZE={}, keeping {}",
                    bulk_size,
                    self.index.bulk_size
                ),
            }
        }

        if let Some(database) = lookup("CONTEXT_SEARCHER_DATABASE") {
            self.storage.database_path = PathBuf::from(database);
        }

        if let Some(log_level) = lookup("CONTEXT_SEARCHER_LOG_LEVEL") {
            self.logging.level = log_level;
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let config_str = toml::to_string_pretty(self).map_err(|e| {
            ContextSearchError::Configuration(format!("Cannot serialize configuration: {}", e))
        })?;
        std::fs::write(path.as_ref(), config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.as_ref().display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.index.bulk_size == 0 {
            return Err(ContextSearchError::Configuration(
                "bulk_size must be greater than 0".to_string(),
            ));
        }

        if self.index.alias.trim().is_empty() {
            return Err(ContextSearchError::Configuration(
                "index alias must not be empty".to_string(),
            ));
        }

        if let Err(e) = Url::parse(&self.elasticsearch.url) {
            return Err(ContextSearchError::Configuration(format!(
                "Invalid Elasticsearch URL '{}': {}",
                self.elasticsearch.url, e
            )));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Context Searcher Configuration:\n\
             - Elasticsearch: {}{}\n\
             - Index alias: {} (bulk size {})\n\
             - Database: {}\n\
             - Log level: {}",
            self.elasticsearch.url,
            if self.elasticsearch.username.is_some() { " (authenticated)" } else { "" },
            self.index.alias,
            self.index.bulk_size,
            self.storage.database_path.display(),
            self.logging.level
        )
    }
}
