//! Error types for granule retrieval.

use std::sync::Arc;
use thiserror::Error;

use aq_common::Granule;

/// Failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("provider rejected credentials")]
    Unauthorized,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("provider returned no granules")]
    EmptyResult,

    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ProviderError::Unauthorized,
            400 | 404 | 422 => ProviderError::Malformed(format!("HTTP {}: {}", status, message)),
            _ => ProviderError::Http { status, message },
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Connection(_) => true,
            ProviderError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

/// Why a fetch did not yield a complete set of granules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// A sub-query kept failing transiently until the retry budget ran out.
    Exhausted,
    /// The provider refused a sub-query permanently.
    Rejected,
    /// The fetch was cancelled.
    Cancelled,
    /// No dataset is configured for a requested channel.
    UnknownChannel,
    /// The region could not be expressed in geographic coordinates.
    UnsupportedRegionCrs,
}

/// A failed sub-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubQueryFailure {
    pub index: usize,
    pub channel: String,
    pub attempts: u32,
    pub error: ProviderError,
}

/// Terminal error of a fetch.
#[derive(Debug, Clone, Error)]
#[error("fetch failed ({kind:?}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    /// Number of granules yielded before the failure.
    pub delivered: usize,
    /// Granules retrieved before the failure. Populated by
    /// [`GranuleStream::collect_all`](crate::GranuleStream::collect_all); a
    /// consumer reading the stream directly has already seen them.
    pub partial: Vec<Arc<Granule>>,
    pub failures: Vec<SubQueryFailure>,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            delivered: 0,
            partial: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FetchErrorKind::Cancelled, "fetch cancelled")
    }

    pub fn unknown_channel(channel: &str) -> Self {
        Self::new(
            FetchErrorKind::UnknownChannel,
            format!("no dataset configured for channel {}", channel),
        )
    }

    /// Summarize failed sub-queries. A permanent rejection outranks an
    /// exhausted retry budget.
    pub fn from_failures(failures: Vec<SubQueryFailure>, delivered: usize) -> Self {
        let rejected = failures.iter().find(|f| !f.error.is_transient());
        let (kind, message) = match rejected {
            Some(f) => (
                FetchErrorKind::Rejected,
                format!("sub-query {} ({}) rejected: {}", f.index, f.channel, f.error),
            ),
            None => {
                let first = failures.first();
                (
                    FetchErrorKind::Exhausted,
                    match first {
                        Some(f) => format!(
                            "{} sub-quer{} failed after retries; first: {} ({}) after {} attempts: {}",
                            failures.len(),
                            if failures.len() == 1 { "y" } else { "ies" },
                            f.index,
                            f.channel,
                            f.attempts,
                            f.error
                        ),
                        None => "sub-queries failed".to_string(),
                    },
                )
            }
        };
        Self {
            kind,
            message,
            delivered,
            partial: Vec::new(),
            failures,
        }
    }

    /// Whether any granule arrived before the failure.
    pub fn is_partial(&self) -> bool {
        self.delivered > 0 || !self.partial.is_empty()
    }

    /// The permanent provider error behind a rejection, if any.
    pub fn rejection(&self) -> Option<&ProviderError> {
        self.failures
            .iter()
            .map(|f| &f.error)
            .find(|e| !e.is_transient())
    }
}
