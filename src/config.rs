//! Configuration management for the image search client.
//!
//! Loads configuration from a TOML file and provides runtime defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Environment variable that overrides `api.api_key`
pub const API_KEY_ENV: &str = "PIXABAY_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Query a new session starts with when none is given
    #[serde(default = "default_initial_query")]
    pub initial_query: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            initial_query: default_initial_query(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Search endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Key appended as the `key` query parameter to every request
    #[serde(default)]
    pub api_key: String,

    /// Results requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// HTTP request timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            page_size: default_page_size(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database holding cached results
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Evict all but this many recently fetched queries (unset = never evict)
    #[serde(default)]
    pub max_queries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_queries: None,
        }
    }
}

// Default value functions for serde
fn default_log_level() -> String {
    "info".to_string()
}

fn default_initial_query() -> String {
    "fruits".to_string()
}

fn default_base_url() -> String {
    "https://pixabay.com/api/".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_timeout() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("image-search")
        .join("images.db")
}

impl Config {
    /// Load configuration from a specific path, then apply environment overrides
    pub fn load_from_path(path: PathBuf) -> Self {
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        };

        config.apply_env(std::env::var(API_KEY_ENV).ok());
        config
    }

    fn apply_env(&mut self, api_key: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.api.api_key = key;
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("image-search")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
