//! Configuration loading for the GLINT engine.
//!
//! Every field has a default, so an empty file (or no file) yields the stock
//! engine: a 10 minute TTL, a 64 MiB durable tier, pages of 50 items.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted by [`GlintConfig::load`].
pub const CONFIG_ENV_VAR: &str = "GLINT_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct GlintConfig {
    pub cache: CacheSettings,
    pub loader: LoaderSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheSettings {
    /// Entry lifetime, applied uniformly to every key.
    pub ttl_secs: u64,
    /// Directory of the LMDB durable tier. `None` keeps the durable tier in
    /// memory only.
    pub durable_path: Option<PathBuf>,
    /// LMDB map size. Writes beyond it are dropped, never surfaced.
    pub durable_max_size_mb: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            durable_path: None,
            durable_max_size_mb: 64,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn durable_max_size_bytes(&self) -> usize {
        self.durable_max_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoaderSettings {
    /// Number of items requested by a full (first page) fetch.
    pub page_size: usize,
    /// Buffer of the preload event channel; slow subscribers lag past it.
    pub event_capacity: usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            event_capacity: 256,
        }
    }
}

impl GlintConfig {
    /// Resolve the config path from `--config <path>` or `GLINT_CONFIG`,
    /// then parse and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: GlintConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.ttl_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.durable_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.durable_max_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(path) = &self.cache.durable_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "cache.durable_path",
                    reason: "must not be empty when set".to_string(),
                });
            }
        }
        if self.loader.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "loader.page_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.loader.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "loader.event_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
