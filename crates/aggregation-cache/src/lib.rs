//! Request-level result cache with single-flight computation.
//!
//! Concurrent requests for the same key share one computation, so the
//! external provider sees at most one outstanding fetch per request shape.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{AggregationCache, CacheStats, CacheStatus, EntryState, Lookup};
pub use config::CacheConfig;
pub use error::CacheError;
