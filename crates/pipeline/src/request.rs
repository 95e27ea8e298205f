//! Request and response types of [`PipelineOrchestrator::resolve`].
//!
//! [`PipelineOrchestrator::resolve`]: crate::PipelineOrchestrator::resolve

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use aggregation_cache::CacheStatus;
use aq_common::{BoundingBox, CacheKey, CrsCode, Region, RequestError, TimeWindow};
use index_computer::IndexResult;

/// Per-request knobs. `None` falls back to the configured default.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Accept an expired cached result instead of recomputing.
    pub stale_allowed: Option<bool>,
    /// Build a result from whatever arrived when some sub-queries failed.
    pub accept_partial_fetch: Option<bool>,
    /// Give up waiting after this long.
    pub deadline: Option<Duration>,
    /// Caller-side cancellation.
    pub cancel: Option<CancellationToken>,
}

/// One air-quality request.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub region: Region,
    pub window: TimeWindow,
    pub indices: Vec<String>,
    pub options: ResolveOptions,
}

impl ResolveRequest {
    pub fn new<S: AsRef<str>>(region: Region, window: TimeWindow, indices: &[S]) -> Self {
        Self {
            region,
            window,
            indices: indices.iter().map(|s| s.as_ref().to_string()).collect(),
            options: ResolveOptions::default(),
        }
    }

    /// Build from raw text as it arrives from a caller: `min_x,min_y,max_x,max_y`,
    /// a CRS code, a `start/end` window and comma-separated index names.
    pub fn parse(bbox: &str, crs: &str, window: &str, indices: &str) -> Result<Self, RequestError> {
        let crs = CrsCode::parse(crs).map_err(|e| RequestError::invalid_input(e.to_string()))?;
        let bbox = BoundingBox::from_param_string(bbox)
            .map_err(|e| RequestError::invalid_input(e.to_string()))?;
        let region =
            Region::bbox(bbox, crs).map_err(|e| RequestError::invalid_input(e.to_string()))?;
        let window =
            TimeWindow::parse(window).map_err(|e| RequestError::invalid_input(e.to_string()))?;
        let names: Vec<&str> = indices
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self::new(region, window, &names))
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn stale_allowed(mut self, allowed: bool) -> Self {
        self.options.stale_allowed = Some(allowed);
        self
    }

    pub fn accept_partial_fetch(mut self, accept: bool) -> Self {
        self.options.accept_partial_fetch = Some(accept);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.options.deadline = Some(deadline);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }
}

/// A resolved request.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub result: Arc<IndexResult>,
    pub cache_key: CacheKey,
    pub cache_status: CacheStatus,
    /// Served from an expired cache entry.
    pub stale: bool,
    /// Some cell was under-observed or some sub-query failed.
    pub partial_coverage: bool,
}
