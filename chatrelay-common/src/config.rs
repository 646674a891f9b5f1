//! Configuration loading and default path resolution
//!
//! Bootstrap configuration comes from a TOML file. Every field has a compiled
//! default, so a missing file is not fatal. Resolution priority:
//! 1. Command-line argument / environment variable (applied by the binary)
//! 2. TOML config file (`--config` path, else the platform config directory)
//! 3. Compiled defaults

use crate::retry::{PollPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, DEFAULT_MIN_DELAY_MS};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Prompt used when a chat request does not carry one
pub const DEFAULT_PROMPT: &str =
    "Write me a long essay about the importance of the internet in the modern world.";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
        }
    }
}

/// Record store settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path; platform data directory when unset
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }
}

/// Inference service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub model: String,
    pub default_prompt: String,
    /// Limit on establishing the connection; the streamed body itself is
    /// never cut off, however long the generation runs
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            default_prompt: DEFAULT_PROMPT.to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Persistence confirmation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Delay before the persister starts draining fragments
    pub warmup_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            warmup_ms: 0,
        }
    }
}

impl PersistenceConfig {
    pub fn poll_policy(&self) -> Result<PollPolicy> {
        PollPolicy::new(self.max_attempts, self.min_delay_ms, self.max_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform default
    /// location is tried and compiled defaults are used if it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (Some(p.to_path_buf()), true),
            None => (default_config_path(), false),
        };

        let Some(config_path) = config_path else {
            warn!("Could not determine config directory, using defaults");
            return Ok(Self::default());
        };

        if !config_path.exists() {
            if explicit {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    config_path.display()
                )));
            }
            warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.persistence.poll_policy()?;
        if self.upstream.base_url.trim().is_empty() {
            return Err(Error::Config("upstream.base_url must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chatrelay").join("config.toml"))
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("chatrelay"))
        .unwrap_or_else(|| PathBuf::from("./chatrelay_data"))
        .join("chatrelay.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 5780);
        assert_eq!(config.upstream.model, "llama3");
        assert_eq!(config.persistence.max_attempts, 5);
        assert_eq!(config.persistence.warmup_ms, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [persistence]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.persistence.max_attempts, 3);
        assert_eq!(config.persistence.min_delay_ms, 1000);
        assert_eq!(config.persistence.max_delay_ms, 6000);
    }

    #[test]
    fn test_inverted_delay_range_is_rejected() {
        let result = TomlConfig::from_toml_str(
            r#"
            [persistence]
            min_delay_ms = 9000
            max_delay_ms = 10
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_default_database_path_ends_with_file_name() {
        assert!(default_database_path().ends_with("chatrelay.db"));
    }
}
