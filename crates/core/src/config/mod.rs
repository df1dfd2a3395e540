//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SNAPCACHE_*)
//! 2. TOML config file (if SNAPCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Default timezone for schedules that do not name one.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Top-level cache configuration.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SNAPCACHE_*)
/// 2. TOML config file (if SNAPCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the durable store file.
    #[serde(default = "default_location")]
    pub location: PathBuf,

    /// Timezone applied to services that do not set their own.
    #[serde(default)]
    pub timezone: Option<String>,

    /// Records indexed between two cooperative yields.
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,

    /// Load every stored snapshot into memory when the cache starts.
    #[serde(default)]
    pub preload: bool,

    /// Data sources to keep refreshed.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// One configured data source.
///
/// `name`, `cron_expression` and `http_options` are mandatory; they are
/// optional here only so that [`CacheConfig::validate`] can report which one
/// is missing instead of a bare deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default, alias = "cronExpression")]
    pub cron_expression: String,

    #[serde(default, alias = "httpOptions")]
    pub http_options: Option<HttpOptions>,

    /// Dotted path to the array of records inside the payload.
    #[serde(default, alias = "itemsPath")]
    pub items_path: Option<String>,

    /// Record fields to build secondary indexes over, in order.
    #[serde(default)]
    pub indexes: Vec<String>,

    #[serde(default)]
    pub timezone: Option<String>,
}

/// How to fetch a source.
///
/// Either `url` or `host` must be present. When `url` is absent the request
/// URL is assembled from `protocol`, `host`, `port` and `path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpOptions {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_location() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_index_batch_size() -> usize {
    1000
}

fn default_method() -> String {
    "GET".into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            timezone: None,
            index_batch_size: default_index_batch_size(),
            preload: false,
            services: Vec::new(),
        }
    }
}

impl HttpOptions {
    /// Options for a plain GET of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), method: default_method(), ..Default::default() }
    }

    /// Resolve the request URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when neither `url` nor `host` is set and
    /// `ConfigError::Invalid` when the result does not parse.
    pub fn resolve_url(&self) -> Result<url::Url, ConfigError> {
        let raw = match (&self.url, &self.host) {
            (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
            (_, Some(host)) if !host.trim().is_empty() => {
                let protocol = self.protocol.as_deref().unwrap_or("http").trim_end_matches(':');
                let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
                let path = self.path.as_deref().unwrap_or("/");
                let sep = if path.starts_with('/') { "" } else { "/" };
                format!("{protocol}://{}{port}{sep}{path}", host.trim())
            }
            _ => {
                return Err(ConfigError::Missing {
                    field: "http_options.url".into(),
                    hint: "set http_options.url or http_options.host".into(),
                });
            }
        };

        url::Url::parse(&raw)
            .map_err(|e| ConfigError::Invalid { field: "http_options.url".into(), reason: format!("{raw}: {e}") })
    }
}

impl ServiceConfig {
    /// Timezone for this service's schedule.
    pub fn effective_timezone<'a>(&'a self, cache: &'a CacheConfig) -> &'a str {
        self.timezone
            .as_deref()
            .or(cache.timezone.as_deref())
            .unwrap_or(DEFAULT_TIMEZONE)
    }
}

impl CacheConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SNAPCACHE_`
    /// 2. TOML file from `SNAPCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SNAPCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SNAPCACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}
