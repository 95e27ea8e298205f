//! The seam between the fetcher and a remote data provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aq_common::{BoundingBox, CrsCode, Granule, TimeWindow};

use crate::config::DatasetConfig;
use crate::error::ProviderError;

/// One provider request: a single dataset over a bounded tile and span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    /// Position in the deterministic plan.
    pub index: usize,
    pub dataset: DatasetConfig,
    /// Tile in `crs` units.
    pub bbox: BoundingBox,
    pub crs: CrsCode,
    pub window: TimeWindow,
}

impl SubQuery {
    /// Short label for log lines.
    pub fn label(&self) -> String {
        format!("{}#{}", self.dataset.channel, self.index)
    }
}

/// Handle to an asynchronous provider job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    /// Status URL when the provider supplies one.
    pub status_url: Option<String>,
}

/// Immediate answer to a submitted sub-query.
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    /// Granules returned synchronously.
    Inline(Vec<Granule>),
    /// Work was queued; poll the job until it settles.
    Job(JobHandle),
}

/// Result of polling a job.
#[derive(Debug, Clone)]
pub enum JobStatus {
    Running { progress: Option<u8> },
    Successful(Vec<Granule>),
    Failed(String),
}

/// A remote source of granules.
///
/// Implementations must be cheap to share across tasks; the fetcher holds
/// one behind an `Arc` and calls it concurrently.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Provider name for logs and provenance.
    fn name(&self) -> &str;

    /// Submit one sub-query.
    async fn submit(&self, query: &SubQuery) -> Result<ProviderResponse, ProviderError>;

    /// Poll an asynchronous job.
    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, ProviderError>;
}
