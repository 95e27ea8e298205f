//! Error types for normalization.

use thiserror::Error;

/// Why a set of granules could not be normalized.
///
/// Partial coverage is not an error; it shows up in per-cell coverage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("no granules to normalize")]
    NoGranules,

    #[error("granule {granule_id}: unparseable CRS {crs:?}")]
    UnparseableCrs { granule_id: String, crs: String },

    #[error("granule {granule_id}: cannot reproject {from} onto a {to} lattice")]
    IncompatibleCrs {
        granule_id: String,
        from: String,
        to: String,
    },

    #[error("granule {granule_id}: {reason}")]
    MalformedGranule { granule_id: String, reason: String },

    #[error("lattice of {cells} cells exceeds the limit of {max}")]
    LatticeTooLarge { cells: usize, max: usize },

    #[error("invalid lattice: {0}")]
    InvalidLattice(String),
}

pub type Result<T> = std::result::Result<T, NormalizationError>;
