//! Concurrent, retrying granule retrieval.

use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use metrics::counter;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

use aq_common::{Granule, Region, TimeWindow};

use crate::config::FetcherConfig;
use crate::error::{FetchError, ProviderError, SubQueryFailure};
use crate::plan::plan_subqueries;
use crate::provider::{DataProvider, JobHandle, JobStatus, ProviderResponse, SubQuery};

/// Retrieves granules for (region, window) from a [`DataProvider`].
///
/// No caching happens here; every call goes to the provider.
#[derive(Clone)]
pub struct GranuleFetcher {
    provider: Arc<dyn DataProvider>,
    config: Arc<FetcherConfig>,
}

impl GranuleFetcher {
    pub fn new(provider: Arc<dyn DataProvider>, config: FetcherConfig) -> Self {
        Self {
            provider,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Start fetching `channels` over `region` and `window`.
    ///
    /// Sub-queries run in a background task, at most `max_concurrent` at a
    /// time. Granules are yielded as they arrive. If any sub-query fails the
    /// stream ends with a single `Err` after every other sub-query has
    /// settled. Cancelling `cancel` or dropping the stream aborts whatever
    /// is still in flight.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(region = %region, window = %window))]
    pub fn fetch(
        &self,
        region: &Region,
        window: &TimeWindow,
        channels: &[String],
        cancel: &CancellationToken,
    ) -> Result<GranuleStream, FetchError> {
        let plan = plan_subqueries(&self.config, region, window, channels)?;
        let subqueries = plan.len();
        info!(
            provider = self.provider.name(),
            subqueries,
            channels = ?channels,
            "Starting granule fetch"
        );

        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(drive(
            self.provider.clone(),
            self.config.clone(),
            plan,
            tx,
            token.clone(),
        ));

        Ok(GranuleStream {
            rx,
            subqueries,
            _guard: token.drop_guard(),
        })
    }

    /// Fetch and wait for every sub-query.
    pub async fn fetch_all(
        &self,
        region: &Region,
        window: &TimeWindow,
        channels: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Granule>>, FetchError> {
        self.fetch(region, window, channels, cancel)?
            .collect_all()
            .await
    }
}

/// Lazy, finite sequence of fetched granules.
///
/// Dropping the stream cancels outstanding sub-queries.
pub struct GranuleStream {
    rx: mpsc::Receiver<Result<Arc<Granule>, FetchError>>,
    subqueries: usize,
    _guard: DropGuard,
}

impl GranuleStream {
    /// Number of sub-queries in the plan.
    pub fn subqueries(&self) -> usize {
        self.subqueries
    }

    /// Drain the stream. On failure the error carries the granules that
    /// did arrive in `partial`.
    pub async fn collect_all(mut self) -> Result<Vec<Arc<Granule>>, FetchError> {
        let mut granules = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(granule) => granules.push(granule),
                Err(mut e) => {
                    e.partial = granules;
                    return Err(e);
                }
            }
        }
        Ok(granules)
    }
}

impl Stream for GranuleStream {
    type Item = Result<Arc<Granule>, FetchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

// ============================================================================
// Driver
// ============================================================================

enum SubQueryError {
    Cancelled,
    Failed(SubQueryFailure),
}

async fn drive(
    provider: Arc<dyn DataProvider>,
    config: Arc<FetcherConfig>,
    plan: Vec<SubQuery>,
    tx: mpsc::Sender<Result<Arc<Granule>, FetchError>>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let limit = config.max_concurrent.max(1);
    let mut delivered = 0usize;
    let mut failures = Vec::new();

    let mut outcomes = stream::iter(plan.into_iter().map(|query| {
        let provider = provider.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        async move { run_subquery(provider.as_ref(), &config, &query, &cancel).await }
    }))
    .buffer_unordered(limit);

    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Ok(granules) => {
                for granule in granules {
                    delivered += 1;
                    if tx.send(Ok(Arc::new(granule))).await.is_err() {
                        // Receiver gone; nobody is listening any more.
                        cancel.cancel();
                        return;
                    }
                }
            }
            Err(SubQueryError::Cancelled) => {}
            Err(SubQueryError::Failed(failure)) => failures.push(failure),
        }
    }

    if cancel.is_cancelled() {
        debug!(delivered, "Granule fetch cancelled");
        let mut err = FetchError::cancelled();
        err.delivered = delivered;
        let _ = tx.send(Err(err)).await;
        return;
    }

    if failures.is_empty() {
        info!(
            granules = delivered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Granule fetch complete"
        );
        return;
    }

    failures.sort_by_key(|f| f.index);
    let err = FetchError::from_failures(failures, delivered);
    warn!(
        kind = ?err.kind,
        failed = err.failures.len(),
        delivered,
        error = %err.message,
        "Granule fetch failed"
    );
    let _ = tx.send(Err(err)).await;
}

/// Run one sub-query with retry on transient failures.
async fn run_subquery(
    provider: &dyn DataProvider,
    config: &FetcherConfig,
    query: &SubQuery,
    cancel: &CancellationToken,
) -> Result<Vec<Granule>, SubQueryError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        counter!("aq_fetch_attempts_total").increment(1);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SubQueryError::Cancelled),
            r = attempt_once(provider, config, query) => r,
        };

        match result {
            Ok(granules) => {
                debug!(
                    subquery = %query.label(),
                    attempt,
                    granules = granules.len(),
                    "Sub-query succeeded"
                );
                counter!("aq_granules_fetched_total").increment(granules.len() as u64);
                return Ok(stamp(granules, query));
            }
            Err(e) if e.is_transient() && config.retry.should_retry(attempt) => {
                let delay = config.retry.delay(attempt, &mut rand::thread_rng());
                counter!("aq_fetch_retries_total").increment(1);
                warn!(
                    subquery = %query.label(),
                    error = %e,
                    retry = attempt,
                    max_attempts = config.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Sub-query failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SubQueryError::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
            Err(e) => {
                counter!("aq_fetch_failures_total").increment(1);
                warn!(
                    subquery = %query.label(),
                    error = %e,
                    attempts = attempt,
                    transient = e.is_transient(),
                    "Sub-query failed"
                );
                return Err(SubQueryError::Failed(SubQueryFailure {
                    index: query.index,
                    channel: query.dataset.channel.clone(),
                    attempts: attempt,
                    error: e,
                }));
            }
        }
    }
}

/// One submission, following an async job to completion if needed.
async fn attempt_once(
    provider: &dyn DataProvider,
    config: &FetcherConfig,
    query: &SubQuery,
) -> Result<Vec<Granule>, ProviderError> {
    let response = timeout(config.request_timeout(), provider.submit(query))
        .await
        .map_err(|_| ProviderError::Timeout)??;

    let granules = match response {
        ProviderResponse::Inline(granules) => granules,
        ProviderResponse::Job(handle) => await_job(provider, config, &handle).await?,
    };

    if granules.is_empty() {
        return Err(ProviderError::EmptyResult);
    }
    Ok(granules)
}

async fn await_job(
    provider: &dyn DataProvider,
    config: &FetcherConfig,
    job: &JobHandle,
) -> Result<Vec<Granule>, ProviderError> {
    let deadline = Instant::now() + config.job_timeout();
    loop {
        let status = timeout(config.request_timeout(), provider.poll(job))
            .await
            .map_err(|_| ProviderError::Timeout)??;

        match status {
            JobStatus::Successful(granules) => return Ok(granules),
            JobStatus::Failed(message) => {
                return Err(ProviderError::JobFailed {
                    job_id: job.job_id.clone(),
                    message,
                })
            }
            JobStatus::Running { progress } => {
                debug!(job_id = %job.job_id, progress = ?progress, "Job still running");
                if Instant::now() + config.poll_interval() > deadline {
                    return Err(ProviderError::Timeout);
                }
                sleep(config.poll_interval()).await;
            }
        }
    }
}

fn stamp(mut granules: Vec<Granule>, query: &SubQuery) -> Vec<Granule> {
    let now = Utc::now();
    for granule in &mut granules {
        granule.channel = query.dataset.channel.clone();
        granule.provenance.fetched_at = now;
        if granule.provenance.source_id.is_empty() {
            granule.provenance.source_id = query.dataset.collection_id.clone();
        }
    }
    granules
}
