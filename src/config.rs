//! Configuration loader and validator for the cache client.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::gateway::HttpSettings;
use crate::model::EntityType;
use crate::schema::PayloadSource;
use crate::store::{MergePolicies, MergePolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub api: Api,
    #[serde(default)]
    pub cache: Cache,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub source: PayloadSource,
    pub base_url: String,
    #[serde(default)]
    pub session_cookie: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Merge policy selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    #[serde(default)]
    pub default_policy: MergePolicy,
    #[serde(default)]
    pub policies: BTreeMap<EntityType, MergePolicy>,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Config {
    pub fn merge_policies(&self) -> MergePolicies {
        MergePolicies {
            default: self.cache.default_policy,
            overrides: self.cache.policies.clone(),
        }
    }

    /// Base URL with a trailing slash, so relative routes join beneath it.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = self.api.base_url.trim();
        let normalized = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        };
        Url::parse(&normalized).map_err(|_| ConfigError::Invalid("api.base_url must be an absolute URL"))
    }

    pub fn http_settings(&self) -> Result<HttpSettings, ConfigError> {
        let mut settings = HttpSettings::new(self.base_url()?);
        settings.session_cookie = self.api.session_cookie.clone();
        settings.timeout = Duration::from_millis(self.api.timeout_ms);
        Ok(settings)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    let url = cfg.base_url()?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid("api.base_url must use http or https"));
    }
    if cfg.api.timeout_ms == 0 {
        return Err(ConfigError::Invalid("api.timeout_ms must be > 0"));
    }
    if let Some(cookie) = &cfg.api.session_cookie {
        if cookie.trim().is_empty() {
            return Err(ConfigError::Invalid("api.session_cookie must be non-empty when set"));
        }
    }
    Ok(())
}

/// Returns the canonical example YAML content.
pub fn example() -> &'static str {
    r#"api:
  source: rest
  base_url: "http://localhost:3020/api/"
  session_cookie: null
  timeout_ms: 10000

cache:
  default_policy: shallow_merge
  policies:
    repository: replace
"#
}
