//! Settings file (`finloader.toml`).
//!
//! Every key is optional. Provider overrides are keyed by provider name:
//!
//! ```toml
//! data_dir = "data"
//!
//! [providers.twelve_data]
//! timeout_secs = 20
//! base_delay_secs = 30
//!
//! [groups]
//! metals = ["XAUUSD", "XAGUSD"]
//! ```

use crate::data::provider::{ProviderKind, UnknownProvider};
use crate::data::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "finloader.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("[providers.{0}]: {1}")]
    UnknownProvider(String, UnknownProvider),

    #[error("group '{group}': {reason}")]
    InvalidGroup { group: String, reason: String },
}

/// Optional per-provider overrides, all in whole seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderOverrides {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_delay_secs: Option<u64>,
    pub max_delay_secs: Option<u64>,
    pub breaker_cooldown_secs: Option<u64>,
}

/// Resolved settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker_cooldown: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub providers: BTreeMap<String, ProviderOverrides>,
    /// Extra symbol groups, name -> symbols.
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            providers: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        for name in settings.providers.keys() {
            name.parse::<ProviderKind>()
                .map_err(|e| ConfigError::UnknownProvider(name.clone(), e))?;
        }
        Ok(settings)
    }

    /// Load `explicit` if given, else [`DEFAULT_CONFIG_FILE`] if it exists, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn provider(&self, kind: ProviderKind) -> ProviderSettings {
        let o = self.providers.get(kind.as_str()).cloned().unwrap_or_default();
        let defaults = RetryPolicy::default();

        ProviderSettings {
            base_url: o
                .base_url
                .unwrap_or_else(|| kind.default_base_url().to_string()),
            timeout: Duration::from_secs(o.timeout_secs.unwrap_or(10)),
            retry: RetryPolicy::new(
                o.max_retries.unwrap_or(defaults.max_retries),
                Duration::from_secs(o.base_delay_secs.unwrap_or(kind.default_base_delay_secs())),
                o.max_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.max_delay),
            ),
            breaker_cooldown: Duration::from_secs(o.breaker_cooldown_secs.unwrap_or(30 * 60)),
        }
    }
}
