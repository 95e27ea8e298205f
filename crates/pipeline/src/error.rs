//! Internal pipeline failures and their translation to [`RequestError`].

use thiserror::Error;

use aggregation_cache::CacheError;
use aq_common::{ErrorKind, RequestError};
use granule_fetcher::{FetchError, FetchErrorKind, ProviderError};
use grid_normalizer::NormalizationError;
use index_computer::ComputationError;

/// Failure of the fetch, normalize, compute chain.
///
/// This is what the cache stores for failed entries, so repeated callers
/// see the original cause.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalize(#[from] NormalizationError),

    #[error(transparent)]
    Compute(#[from] ComputationError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// External classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch(e) => match e.kind {
                FetchErrorKind::Exhausted => ErrorKind::ProviderUnavailable,
                FetchErrorKind::Rejected => match e.rejection() {
                    Some(ProviderError::EmptyResult) if e.delivered == 0 => ErrorKind::NoData,
                    _ => ErrorKind::ProviderUnavailable,
                },
                FetchErrorKind::Cancelled => ErrorKind::Cancelled,
                FetchErrorKind::UnknownChannel => ErrorKind::ComputationFailure,
                FetchErrorKind::UnsupportedRegionCrs => ErrorKind::DataIncompatible,
            },
            PipelineError::Normalize(e) => match e {
                NormalizationError::NoGranules => ErrorKind::NoData,
                NormalizationError::UnparseableCrs { .. }
                | NormalizationError::IncompatibleCrs { .. }
                | NormalizationError::MalformedGranule { .. } => ErrorKind::DataIncompatible,
                NormalizationError::LatticeTooLarge { .. }
                | NormalizationError::InvalidLattice(_) => ErrorKind::InvalidInput,
            },
            PipelineError::Compute(_) | PipelineError::Internal(_) => {
                ErrorKind::ComputationFailure
            }
        }
    }

    pub fn to_request_error(&self) -> RequestError {
        RequestError::new(self.kind(), self.to_string())
    }
}

impl From<&PipelineError> for RequestError {
    fn from(e: &PipelineError) -> Self {
        e.to_request_error()
    }
}

/// Translate a cache lookup failure.
pub fn cache_error_to_request(e: CacheError<PipelineError>) -> RequestError {
    match e {
        CacheError::Compute(e) => e.to_request_error(),
        CacheError::Cancelled => RequestError::new(ErrorKind::Cancelled, "request cancelled"),
        CacheError::Abandoned => RequestError::new(
            ErrorKind::ComputationFailure,
            "computation ended without a result",
        ),
    }
}
