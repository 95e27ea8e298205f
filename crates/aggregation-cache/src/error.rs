//! Cache error type.

use thiserror::Error;

/// Why a lookup produced no value.
///
/// `Compute` carries the computation's own error, whether it was just
/// produced or replayed from a cached failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError<E> {
    #[error("{0}")]
    Compute(E),

    #[error("caller cancelled while waiting for the computation")]
    Cancelled,

    #[error("computation ended without producing a result")]
    Abandoned,
}

impl<E> CacheError<E> {
    /// The computation's error, if that is what this is.
    pub fn compute_error(&self) -> Option<&E> {
        match self {
            CacheError::Compute(e) => Some(e),
            _ => None,
        }
    }
}
