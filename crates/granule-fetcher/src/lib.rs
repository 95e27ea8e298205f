//! Granule retrieval from a remote Earth-observation provider.
//!
//! Requests are split into provider-sized sub-queries, issued concurrently
//! with per-sub-query retry, and delivered as a lazy [`GranuleStream`].
//! Nothing is cached at this layer.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod harmony;
pub mod plan;
pub mod provider;
pub mod retry;

pub use config::{DatasetConfig, FetcherConfig};
pub use error::{FetchError, FetchErrorKind, ProviderError, SubQueryFailure};
pub use fetcher::{GranuleFetcher, GranuleStream};
pub use harmony::HarmonyProvider;
pub use plan::plan_subqueries;
pub use provider::{DataProvider, JobHandle, JobStatus, ProviderResponse, SubQuery};
pub use retry::RetryPolicy;
