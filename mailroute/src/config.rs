use std::path::{Path, PathBuf};

use mailroute_delivery::{ChannelConfig, DeliveryConfig, DispatcherConfig, DnsConfig, MxCacheConfig};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

/// Where the job queue and the shared cache live.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection URL for the job queue, e.g. `redis://127.0.0.1:6379`.
    pub url: String,

    /// Separate instance for the MX cache and the log channels. Shares the
    /// queue instance when absent.
    #[serde(default)]
    pub cache_url: Option<String>,
}

impl RedisConfig {
    pub fn cache_url(&self) -> &str {
        self.cache_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,

    #[serde(default)]
    pub queue: DispatcherConfig,

    #[serde(default)]
    pub mx_cache: MxCacheConfig,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Parses a RON document. `Option` fields may be written without `Some(..)`.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }
}
