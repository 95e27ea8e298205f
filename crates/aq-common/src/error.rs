//! The stable error taxonomy exposed to the API layer.
//!
//! Internal component errors are translated into a [`RequestError`] by the
//! orchestrator before they cross the system boundary. Partial coverage is
//! deliberately absent: it travels as a flag on a successful result.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using RequestError.
pub type RequestResult<T> = Result<T, RequestError>;

/// Stable, coarse classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller error; never retried automatically.
    InvalidInput,
    /// Provider unreachable or failing after the retry budget was spent.
    ProviderUnavailable,
    /// The provider holds no observations for the requested shape.
    NoData,
    /// Mismatched or unparseable coordinate systems/units; permanent.
    DataIncompatible,
    /// Missing channel or registry mismatch; permanent.
    ComputationFailure,
    /// The caller cancelled the request.
    Cancelled,
    /// The caller's deadline elapsed.
    DeadlineExceeded,
}

impl ErrorKind {
    /// Suggested HTTP status for the routing layer.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NoData => 404,
            ErrorKind::DataIncompatible | ErrorKind::ComputationFailure => 422,
            ErrorKind::Cancelled => 499,
            ErrorKind::ProviderUnavailable => 503,
            ErrorKind::DeadlineExceeded => 504,
        }
    }

    /// Whether an identical request might succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderUnavailable | ErrorKind::Cancelled | ErrorKind::DeadlineExceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::NoData => "no_data",
            ErrorKind::DataIncompatible => "data_incompatible",
            ErrorKind::ComputationFailure => "computation_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the pipeline's public interface.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RequestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RequestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderUnavailable, message)
    }

    pub fn data_incompatible(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataIncompatible, message)
    }

    pub fn computation_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ComputationFailure, message)
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}
