//! Pipeline configuration: YAML file, environment overrides, validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use aggregation_cache::CacheConfig;
use granule_fetcher::harmony::DEFAULT_ENDPOINT;
use granule_fetcher::FetcherConfig;
use grid_normalizer::{NormalizerConfig, ReducerKind};

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where and how to reach the data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
    /// Bearer token. Never written back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
        }
    }
}

/// Everything the orchestrator needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub provider: ProviderConfig,
    pub fetcher: FetcherConfig,
    pub normalizer: NormalizerConfig,
    pub cache: CacheConfig,
    /// Default for requests that do not say whether stale results are fine.
    pub stale_allowed: bool,
    /// Default for requests that do not say whether to build results from
    /// an incomplete fetch.
    pub accept_partial_fetch: bool,
}

impl PipelineConfig {
    /// Parse YAML. Missing sections take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `AQ_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Override fields from any variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("AQ_PROVIDER_ENDPOINT") {
            self.provider.endpoint = endpoint;
        }
        if let Some(token) = lookup("AQ_PROVIDER_TOKEN").or_else(|| lookup("EDL_TOKEN")) {
            if !token.trim().is_empty() {
                self.provider.token = Some(token);
            }
        }

        set(&lookup, "AQ_MAX_EXTENT_DEG", &mut self.fetcher.max_extent_deg)?;
        set(&lookup, "AQ_MAX_CONCURRENT_FETCHES", &mut self.fetcher.max_concurrent)?;
        set(&lookup, "AQ_REQUEST_TIMEOUT_SECS", &mut self.fetcher.request_timeout_secs)?;
        set(&lookup, "AQ_RETRY_MAX_ATTEMPTS", &mut self.fetcher.retry.max_attempts)?;
        set(&lookup, "AQ_RETRY_BASE_DELAY_MS", &mut self.fetcher.retry.base_delay_ms)?;
        set(&lookup, "AQ_RETRY_MAX_DELAY_MS", &mut self.fetcher.retry.max_delay_ms)?;
        set(&lookup, "AQ_RETRY_JITTER_MS", &mut self.fetcher.retry.jitter_ms)?;

        set(&lookup, "AQ_GRID_RESOLUTION_DEG", &mut self.normalizer.resolution_deg)?;
        set(&lookup, "AQ_TEMPORAL_BUCKET_SECS", &mut self.normalizer.temporal_bucket_secs)?;
        set(&lookup, "AQ_MIN_COVERAGE", &mut self.normalizer.min_coverage)?;
        if let Some(value) = lookup("AQ_REDUCER") {
            self.normalizer.reducer = ReducerKind::from_str(&value).map_err(|_| {
                ConfigError::InvalidEnv {
                    var: "AQ_REDUCER".to_string(),
                    value,
                }
            })?;
        }

        set(&lookup, "AQ_CACHE_READY_TTL_SECS", &mut self.cache.ready_ttl_secs)?;
        set(&lookup, "AQ_CACHE_FAILED_TTL_SECS", &mut self.cache.failed_ttl_secs)?;
        set(&lookup, "AQ_CACHE_STALE_RETENTION_SECS", &mut self.cache.stale_retention_secs)?;
        set(&lookup, "AQ_CACHE_MAX_ENTRIES", &mut self.cache.max_entries)?;

        if let Some(value) = lookup("AQ_STALE_ALLOWED") {
            self.stale_allowed = parse_bool("AQ_STALE_ALLOWED", value)?;
        }
        if let Some(value) = lookup("AQ_ACCEPT_PARTIAL_FETCH") {
            self.accept_partial_fetch = parse_bool("AQ_ACCEPT_PARTIAL_FETCH", value)?;
        }
        Ok(())
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.provider.endpoint.starts_with("http://")
            && !self.provider.endpoint.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "provider endpoint must be an http(s) URL, got {:?}",
                self.provider.endpoint
            )));
        }
        self.fetcher.validate().map_err(ConfigError::Invalid)?;
        self.normalizer.validate().map_err(ConfigError::Invalid)?;
        self.cache.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

fn set<T, F>(lookup: &F, var: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(var) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        })?;
    }
    Ok(())
}

fn parse_bool(var: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        }),
    }
}
