//! Scripted in-memory [`DataProvider`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aq_common::Granule;
use granule_fetcher::{
    DataProvider, JobHandle, JobStatus, ProviderError, ProviderResponse, SubQuery,
};

use crate::fixtures::channel_value;
use crate::generators::uniform_granule;

type GranuleFactory = dyn Fn(&SubQuery) -> Vec<Granule> + Send + Sync;

/// Provider double for fetcher, cache and orchestrator tests.
///
/// By default every sub-query yields one 4 x 4 granule covering the
/// sub-query tile and span, filled with the channel's typical value.
pub struct MockProvider {
    factory: Arc<GranuleFactory>,
    latency: Duration,
    job_polls: Option<usize>,
    transient_failures: AtomicUsize,
    permanent_failure: Mutex<Option<ProviderError>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    jobs: Mutex<HashMap<String, (SubQuery, usize)>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            factory: Arc::new(default_granules),
            latency: Duration::ZERO,
            job_polls: None,
            transient_failures: AtomicUsize::new(0),
            permanent_failure: Mutex::new(None),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Produce granules with `factory` instead of the default.
    pub fn with_granules<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SubQuery) -> Vec<Granule> + Send + Sync + 'static,
    {
        self.factory = Arc::new(factory);
        self
    }

    /// Fail the next `n` submissions with HTTP 503.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every submission with `error`.
    pub fn with_permanent_failure(self, error: ProviderError) -> Self {
        if let Ok(mut slot) = self.permanent_failure.lock() {
            *slot = Some(error);
        }
        self
    }

    /// Sleep this long inside every submit.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer with job handles that report `running` for `polls` polls.
    pub fn with_async_jobs(mut self, polls: usize) -> Self {
        self.job_polls = Some(polls);
        self
    }

    /// Stop failing from now on.
    pub fn heal(&self) {
        self.transient_failures.store(0, Ordering::SeqCst);
        if let Ok(mut slot) = self.permanent_failure.lock() {
            *slot = None;
        }
    }

    /// Submissions received so far.
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Job polls received so far.
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DataProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, query: &SubQuery) -> Result<ProviderResponse, ProviderError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.take_transient_failure() {
            return Err(ProviderError::Http {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let permanent = self
            .permanent_failure
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(error) = permanent {
            return Err(error);
        }

        match self.job_polls {
            Some(_) => {
                let job_id = format!("job-{}-{}", query.dataset.channel, query.index);
                if let Ok(mut jobs) = self.jobs.lock() {
                    jobs.insert(job_id.clone(), (query.clone(), 0));
                }
                Ok(ProviderResponse::Job(JobHandle {
                    job_id,
                    status_url: None,
                }))
            }
            None => Ok(ProviderResponse::Inline((self.factory)(query))),
        }
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, ProviderError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let running_polls = self.job_polls.unwrap_or(0);

        let query = {
            let mut jobs = self
                .jobs
                .lock()
                .map_err(|_| ProviderError::InvalidResponse("job table poisoned".to_string()))?;
            let entry = jobs
                .get_mut(&job.job_id)
                .ok_or_else(|| ProviderError::Malformed(format!("unknown job {}", job.job_id)))?;
            if entry.1 < running_polls {
                entry.1 += 1;
                let progress = (entry.1 * 100 / (running_polls + 1)) as u8;
                return Ok(JobStatus::Running {
                    progress: Some(progress),
                });
            }
            entry.0.clone()
        };
        Ok(JobStatus::Successful((self.factory)(&query)))
    }
}

fn default_granules(query: &SubQuery) -> Vec<Granule> {
    let value = channel_value(&query.dataset.channel).unwrap_or(1.0);
    vec![uniform_granule(
        &format!("mock-{}-{}", query.dataset.channel, query.index),
        &query.dataset.channel,
        query.bbox,
        query.window,
        4,
        4,
        value,
    )]
}
