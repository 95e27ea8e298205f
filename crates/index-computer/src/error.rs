//! Error types for index computation.

use thiserror::Error;

/// Why an index set could not be evaluated over a grid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("index {index} requires channel {channel}, which the grid lacks")]
    MissingChannel { index: String, channel: String },

    #[error("no indices requested")]
    EmptyIndexSet,

    #[error("index {0} is already registered")]
    DuplicateIndex(String),
}

pub type Result<T> = std::result::Result<T, ComputationError>;
