//! Raw observation granules as delivered by the data provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BoundingBox, TimeWindow};

/// Where a granule came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Provider-assigned granule identifier (or a generated one).
    pub granule_id: String,
    /// Provider collection / dataset identifier.
    pub source_id: String,
    /// When the fetcher received the granule.
    pub fetched_at: DateTime<Utc>,
}

/// One fetched unit of observations for a single measurement channel.
///
/// `values` is row-major, north row first (`row 0` touches `footprint.max_y`).
/// `missing[i]` marks samples the instrument flagged as invalid; non-finite
/// values are treated as missing as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Granule {
    /// Measurement channel this granule observes (e.g. "NO2").
    pub channel: String,
    /// Spatial footprint in `crs` units.
    pub footprint: BoundingBox,
    /// CRS string exactly as reported by the provider.
    pub crs: String,
    /// Observation time span.
    pub coverage: TimeWindow,
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
    pub missing: Vec<bool>,
    pub provenance: Provenance,
}

impl Granule {
    /// Build a granule with no flagged samples.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: impl Into<String>,
        footprint: BoundingBox,
        crs: impl Into<String>,
        coverage: TimeWindow,
        width: usize,
        height: usize,
        values: Vec<f32>,
        source_id: impl Into<String>,
    ) -> Self {
        let missing = vec![false; values.len()];
        Self {
            channel: channel.into(),
            footprint,
            crs: crs.into(),
            coverage,
            width,
            height,
            values,
            missing,
            provenance: Provenance {
                granule_id: Uuid::new_v4().to_string(),
                source_id: source_id.into(),
                fetched_at: Utc::now(),
            },
        }
    }

    /// Replace the missing-value mask.
    pub fn with_missing(mut self, missing: Vec<bool>) -> Self {
        self.missing = missing;
        self
    }

    /// Replace the granule identifier (providers that assign their own).
    pub fn with_granule_id(mut self, id: impl Into<String>) -> Self {
        self.provenance.granule_id = id.into();
        self
    }

    /// Check that the value and mask arrays match the declared shape.
    pub fn validate_shape(&self) -> Result<(), GranuleShapeError> {
        let expected = self.width * self.height;
        if expected == 0 {
            return Err(GranuleShapeError::Empty);
        }
        if self.values.len() != expected {
            return Err(GranuleShapeError::ValueCount {
                expected,
                actual: self.values.len(),
            });
        }
        if self.missing.len() != expected {
            return Err(GranuleShapeError::MaskCount {
                expected,
                actual: self.missing.len(),
            });
        }
        Ok(())
    }

    /// Sample at (col, row), `None` when out of range, flagged or non-finite.
    pub fn sample(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let idx = row * self.width + col;
        if self.missing.get(idx).copied().unwrap_or(true) {
            return None;
        }
        self.values.get(idx).copied().filter(|v| v.is_finite())
    }

    /// Footprint of a single pixel in the granule's own CRS.
    pub fn pixel_bbox(&self, col: usize, row: usize) -> BoundingBox {
        let dx = self.footprint.width() / self.width as f64;
        let dy = self.footprint.height() / self.height as f64;
        let min_x = self.footprint.min_x + col as f64 * dx;
        let max_y = self.footprint.max_y - row as f64 * dy;
        BoundingBox::new(min_x, max_y - dy, min_x + dx, max_y)
    }

    /// Number of valid samples.
    pub fn valid_count(&self) -> usize {
        self.values
            .iter()
            .zip(&self.missing)
            .filter(|(v, m)| !**m && v.is_finite())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GranuleShapeError {
    #[error("granule has no samples")]
    Empty,

    #[error("expected {expected} values, got {actual}")]
    ValueCount { expected: usize, actual: usize },

    #[error("expected {expected} mask entries, got {actual}")]
    MaskCount { expected: usize, actual: usize },
}
