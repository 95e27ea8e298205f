//! The single entry point the API layer talks to.

use futures::StreamExt;
use metrics::counter;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use aggregation_cache::{AggregationCache, CacheStats, EntryState};
use aq_common::{CacheKey, ErrorKind, Region, RequestError, TimeWindow};
use granule_fetcher::{DataProvider, FetchErrorKind, GranuleFetcher, HarmonyProvider};
use grid_normalizer::{GridNormalizer, Lattice};
use index_computer::{IndexComputer, IndexInfo, IndexRegistry, IndexResult};

use crate::config::{ConfigError, PipelineConfig};
use crate::error::{cache_error_to_request, PipelineError};
use crate::request::{Resolution, ResolveRequest};

type ResultCache = AggregationCache<CacheKey, Arc<IndexResult>, PipelineError>;

/// Resolves air-quality requests through the cache, computing on a miss.
pub struct PipelineOrchestrator {
    fetcher: GranuleFetcher,
    normalizer: GridNormalizer,
    computer: IndexComputer,
    cache: ResultCache,
    stale_allowed: bool,
    accept_partial_fetch: bool,
}

impl PipelineOrchestrator {
    /// Build with an explicit provider and index registry.
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn DataProvider>,
        registry: Arc<IndexRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            provider = provider.name(),
            resolution_deg = config.normalizer.resolution_deg,
            min_coverage = config.normalizer.min_coverage,
            indices = registry.len(),
            "Pipeline orchestrator configured"
        );
        Ok(Self {
            fetcher: GranuleFetcher::new(provider, config.fetcher),
            normalizer: GridNormalizer::new(config.normalizer),
            computer: IndexComputer::new(registry),
            cache: AggregationCache::new(config.cache),
            stale_allowed: config.stale_allowed,
            accept_partial_fetch: config.accept_partial_fetch,
        })
    }

    /// Build against the configured Harmony endpoint with the built-in indices.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ConfigError> {
        let provider = HarmonyProvider::new(
            config.provider.endpoint.clone(),
            config.provider.token.clone(),
            config.fetcher.request_timeout(),
        )
        .map_err(|e| ConfigError::Invalid(format!("cannot build provider client: {}", e)))?;
        Self::new(
            config,
            Arc::new(provider),
            Arc::new(IndexRegistry::with_defaults()),
        )
    }

    /// Compute, or fetch from cache, the indices named in `request`.
    #[instrument(
        skip_all,
        fields(
            request_id = %Uuid::new_v4(),
            region = %request.region,
            window = %request.window,
        )
    )]
    pub async fn resolve(&self, request: ResolveRequest) -> Result<Resolution, RequestError> {
        let started = Instant::now();
        let outcome = self.resolve_inner(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(resolution) => {
                counter!("aq_requests_total", "outcome" => "ok").increment(1);
                info!(
                    key = resolution.cache_key.short(),
                    cache_status = ?resolution.cache_status,
                    partial = resolution.partial_coverage,
                    elapsed_ms,
                    "Request resolved"
                );
            }
            Err(e) => {
                counter!("aq_requests_total", "outcome" => e.kind.as_str()).increment(1);
                warn!(kind = %e.kind, error = %e.message, elapsed_ms, "Request failed");
            }
        }
        outcome
    }

    async fn resolve_inner(&self, request: ResolveRequest) -> Result<Resolution, RequestError> {
        let indices = self.validate(&request)?;
        let normalizer_config = self.normalizer.config();
        let key = CacheKey::derive(
            &request.region,
            &request.window,
            &indices,
            normalizer_config.resolution_deg,
            normalizer_config.temporal_bucket_secs,
        );

        let options = &request.options;
        let stale_allowed = options.stale_allowed.unwrap_or(self.stale_allowed);
        let cancel = options.cancel.clone().unwrap_or_default();
        debug!(key = key.short(), indices = ?indices, stale_allowed, "Resolving");

        let chain = Chain {
            fetcher: self.fetcher.clone(),
            normalizer: self.normalizer.clone(),
            computer: self.computer.clone(),
            region: request.region.clone(),
            window: request.window,
            indices,
            accept_partial_fetch: options
                .accept_partial_fetch
                .unwrap_or(self.accept_partial_fetch),
        };
        let lookup = self
            .cache
            .get_or_compute(key.clone(), stale_allowed, &cancel, move |token| {
                chain.run(token)
            });

        let lookup = match options.deadline {
            Some(limit) => tokio::time::timeout(limit, lookup).await.map_err(|_| {
                RequestError::new(
                    ErrorKind::DeadlineExceeded,
                    format!("deadline of {} ms exceeded", limit.as_millis()),
                )
            })?,
            None => lookup.await,
        }
        .map_err(cache_error_to_request)?;

        Ok(Resolution {
            partial_coverage: lookup.value.is_partial(),
            stale: lookup.is_stale(),
            cache_status: lookup.status,
            cache_key: key,
            result: lookup.value,
        })
    }

    /// Check the request and return its canonical index names.
    fn validate(&self, request: &ResolveRequest) -> Result<Vec<String>, RequestError> {
        if request.indices.is_empty() {
            return Err(RequestError::invalid_input("at least one index is required"));
        }

        let registry = self.computer.registry();
        let mut names = Vec::with_capacity(request.indices.len());
        for name in &request.indices {
            let definition = registry.get(name.trim()).ok_or_else(|| {
                let known: Vec<String> = registry.list().into_iter().map(|i| i.name).collect();
                RequestError::invalid_input(format!(
                    "unknown index {:?}; available: {}",
                    name,
                    known.join(", ")
                ))
            })?;
            names.push(definition.name.clone());
        }
        names.sort();
        names.dedup();

        let bounds = request.region.bounds();
        if !bounds.is_finite() || !(request.region.area() > 0.0) {
            return Err(RequestError::invalid_input("region must have a positive, finite area"));
        }
        Lattice::for_region(&request.region, &request.window, self.normalizer.config())
            .map_err(|e| RequestError::invalid_input(e.to_string()))?;

        Ok(names)
    }

    /// Every index a request may name, sorted by name.
    pub fn list_available_indices(&self) -> Vec<IndexInfo> {
        self.computer.registry().list()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop cache entries with nothing left to serve.
    pub fn purge_cache(&self) -> usize {
        self.cache.purge()
    }

    pub fn cache_state(&self, key: &CacheKey) -> Option<EntryState> {
        self.cache.state(key)
    }
}

/// Everything one computation needs, owned so it can outlive the caller.
struct Chain {
    fetcher: GranuleFetcher,
    normalizer: GridNormalizer,
    computer: IndexComputer,
    region: Region,
    window: TimeWindow,
    indices: Vec<String>,
    accept_partial_fetch: bool,
}

impl Chain {
    /// Fetch, normalize and compute. Granules are folded into the grid as
    /// they arrive.
    async fn run(self, cancel: CancellationToken) -> Result<Arc<IndexResult>, PipelineError> {
        let channels = self.computer.registry().required_channels(&self.indices)?;
        let mut accumulator = self.normalizer.accumulator(&self.region, &self.window)?;
        let mut stream = self
            .fetcher
            .fetch(&self.region, &self.window, &channels, &cancel)?;

        let mut fetch_error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(granule) => accumulator.push(&granule)?,
                Err(e) => {
                    fetch_error = Some(e);
                    break;
                }
            }
        }
        drop(stream);

        let partial_fetch = match fetch_error {
            None => false,
            Some(e)
                if self.accept_partial_fetch
                    && e.kind != FetchErrorKind::Cancelled
                    && accumulator.granule_count() > 0 =>
            {
                warn!(
                    error = %e,
                    granules = accumulator.granule_count(),
                    "Fetch incomplete, continuing with the granules that arrived"
                );
                true
            }
            Some(e) => return Err(e.into()),
        };

        let grid = tokio::task::spawn_blocking(move || accumulator.finish())
            .await
            .map_err(|e| PipelineError::Internal(format!("normalization task failed: {}", e)))??;

        let computer = self.computer;
        let indices = self.indices;
        let result = tokio::task::spawn_blocking(move || computer.compute(&grid, &indices))
            .await
            .map_err(|e| PipelineError::Internal(format!("index task failed: {}", e)))??;

        Ok(Arc::new(result.with_partial_fetch(partial_fetch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{bbox, hours_window, region_from, MockProvider};
    use tokio_test::{assert_err, assert_ok};

    fn orchestrator() -> PipelineOrchestrator {
        let mut config = PipelineConfig::default();
        config.normalizer.resolution_deg = 0.25;
        PipelineOrchestrator::new(
            config,
            Arc::new(MockProvider::new()),
            Arc::new(IndexRegistry::with_defaults()),
        )
        .unwrap()
    }

    fn request(indices: &[&str]) -> ResolveRequest {
        ResolveRequest::new(region_from(bbox::HOUSTON), hours_window(1), indices)
    }

    #[test]
    fn test_validate_canonicalizes_names() {
        let orch = orchestrator();
        let names = assert_ok!(orch.validate(&request(&["o3_aqi", " AQI", "aqi", "O3_AQI"])));
        assert_eq!(names, vec!["AQI", "O3_AQI"]);
    }

    #[test]
    fn test_validate_lists_known_indices_on_unknown_name() {
        let orch = orchestrator();
        let err = assert_err!(orch.validate(&request(&["AQI", "SO2"])));
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(err.message.contains("SO2"));
        assert!(err.message.contains("NO2_AQI"));
    }

    #[test]
    fn test_validate_rejects_empty_index_set() {
        let orch = orchestrator();
        let empty: [&str; 0] = [];
        let err = assert_err!(orch.validate(&request(&empty)));
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}
