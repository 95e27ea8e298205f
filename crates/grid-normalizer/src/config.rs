//! Normalization settings.

use serde::{Deserialize, Serialize};

use crate::reducer::ReducerKind;

/// Configuration for building a [`Grid`](crate::Grid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Cell size in degrees. Projected lattices use the equivalent length
    /// at the equator.
    pub resolution_deg: f64,

    /// Temporal bucket size in seconds; `0` means one bucket for the whole
    /// window.
    pub temporal_bucket_secs: i64,

    /// Cells must be observed over strictly more than this fraction of
    /// their area and time (or fully) to keep a value.
    pub min_coverage: f64,

    /// Coverage is measured on a `k x k` lattice of sub-points per cell.
    pub coverage_samples: usize,

    /// Reducer combining the samples of one cell.
    pub reducer: ReducerKind,

    /// Upper bound on `nx * ny * nt`.
    pub max_cells: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            resolution_deg: 0.1,
            temporal_bucket_secs: 3600,
            min_coverage: 0.5,
            coverage_samples: 4,
            reducer: ReducerKind::default(),
            max_cells: 4_000_000,
        }
    }
}

impl NormalizerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.resolution_deg > 0.0) || !self.resolution_deg.is_finite() {
            return Err("resolution_deg must be a positive number".to_string());
        }
        if self.temporal_bucket_secs < 0 {
            return Err("temporal_bucket_secs must be >= 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err("min_coverage must be within [0, 1]".to_string());
        }
        if self.coverage_samples == 0 || self.coverage_samples > 16 {
            return Err("coverage_samples must be within 1..=16".to_string());
        }
        if self.max_cells == 0 {
            return Err("max_cells must be > 0".to_string());
        }
        Ok(())
    }

    /// Whether a cell with `coverage` keeps its value.
    pub fn keeps(&self, coverage: f64) -> bool {
        coverage > self.min_coverage || coverage >= 1.0
    }
}
