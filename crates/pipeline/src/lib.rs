//! End-to-end air-quality pipeline.
//!
//! [`PipelineOrchestrator::resolve`] turns a region, a time window and a set
//! of index names into an [`IndexResult`], fetching granules from the data
//! provider only when the cache has nothing usable.
//!
//! ```text
//! request ─► validate ─► cache key ─► AggregationCache
//!                                        │ miss
//!                                        ▼
//!                  GranuleFetcher ─► GridAccumulator ─► IndexComputer
//! ```
//!
//! [`IndexResult`]: index_computer::IndexResult

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod request;

pub use config::{ConfigError, PipelineConfig, ProviderConfig};
pub use error::{cache_error_to_request, PipelineError};
pub use orchestrator::PipelineOrchestrator;
pub use request::{Resolution, ResolveOptions, ResolveRequest};

pub use aggregation_cache::{CacheStats, CacheStatus, EntryState};
pub use aq_common::{ErrorKind, RequestError};
pub use index_computer::{AqiCategory, IndexInfo, IndexResult};
