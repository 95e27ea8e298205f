//! Configuration for granule retrieval.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// A provider dataset that observes one measurement channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Channel name used throughout the pipeline (e.g. "NO2").
    pub channel: String,
    /// Provider collection identifier.
    pub collection_id: String,
    /// Variable to extract from the collection.
    pub variable: String,
}

impl DatasetConfig {
    pub fn new(
        channel: impl Into<String>,
        collection_id: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            collection_id: collection_id.into(),
            variable: variable.into(),
        }
    }

    /// TEMPO Level-3 collections for the three pollutants the built-in
    /// indices consume.
    pub fn tempo_defaults() -> Vec<DatasetConfig> {
        vec![
            DatasetConfig::new(
                "NO2",
                "C3685668972-LARC_CLOUD",
                "vertical_column_troposphere",
            ),
            DatasetConfig::new("O3", "C2930764281-LARC_CLOUD", "o3_below_cloud"),
            DatasetConfig::new("HCHO", "C2930730944-LARC_CLOUD", "vertical_column"),
        ]
    }
}

/// Configuration for the granule fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Largest sub-query extent on either axis, in degrees.
    pub max_extent_deg: f64,

    /// Longest sub-query time span, in seconds.
    pub max_time_span_secs: u64,

    /// Sub-queries in flight at once.
    pub max_concurrent: usize,

    /// Timeout for a single provider call, in seconds.
    pub request_timeout_secs: u64,

    /// Delay between polls of an asynchronous job, in milliseconds.
    pub poll_interval_ms: u64,

    /// Give up on an asynchronous job after this long (treated as transient).
    pub job_timeout_secs: u64,

    /// Retry policy for transient failures.
    pub retry: RetryPolicy,

    /// Channel-to-collection table.
    pub datasets: Vec<DatasetConfig>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_extent_deg: 10.0,
            max_time_span_secs: 24 * 3600,
            max_concurrent: 4,
            request_timeout_secs: 120,
            poll_interval_ms: 1000,
            job_timeout_secs: 300,
            retry: RetryPolicy::default(),
            datasets: DatasetConfig::tempo_defaults(),
        }
    }
}

impl FetcherConfig {
    pub fn max_time_span(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_time_span_secs as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Look up the dataset observing `channel` (case-insensitive).
    pub fn dataset_for(&self, channel: &str) -> Option<&DatasetConfig> {
        self.datasets
            .iter()
            .find(|d| d.channel.eq_ignore_ascii_case(channel))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_extent_deg > 0.0) {
            return Err("max_extent_deg must be > 0".to_string());
        }
        if self.max_time_span_secs == 0 {
            return Err("max_time_span_secs must be > 0".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be > 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be > 0".to_string());
        }
        if self.datasets.is_empty() {
            return Err("at least one dataset must be configured".to_string());
        }
        self.retry.validate()
    }
}
