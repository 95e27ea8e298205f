//! The canonical lattice over a region and time window.
//!
//! Columns run west to east from `bounds.min_x`, rows run south to north
//! from `bounds.min_y`. The last column/row is clipped to the bounds when
//! the extent is not a multiple of the cell size. Time buckets start at the
//! window start; the last one is clipped to the window end.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use aq_common::{BoundingBox, CrsCode, Region, TimeWindow};

use crate::config::NormalizerConfig;
use crate::error::{NormalizationError, Result};

/// Length of one degree of longitude at the equator on the Web Mercator sphere.
const METERS_PER_DEGREE: f64 = 111_319.490_793_273_57;

/// Tolerance when counting cells, so exact multiples do not grow a sliver.
const COUNT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    crs: CrsCode,
    bounds: BoundingBox,
    dx: f64,
    dy: f64,
    nx: usize,
    ny: usize,
    window: TimeWindow,
    bucket_ms: i64,
    nt: usize,
}

impl Lattice {
    /// Build a lattice with square cells of `cell_size` CRS units.
    pub fn new(
        crs: CrsCode,
        bounds: BoundingBox,
        cell_size: f64,
        window: TimeWindow,
        bucket_secs: i64,
    ) -> Result<Self> {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(NormalizationError::InvalidLattice(format!(
                "cell size must be positive, got {}",
                cell_size
            )));
        }
        if !bounds.is_finite() || !(bounds.width() > 0.0) || !(bounds.height() > 0.0) {
            return Err(NormalizationError::InvalidLattice(format!(
                "degenerate bounds {:?}",
                bounds
            )));
        }

        let nx = count(bounds.width(), cell_size);
        let ny = count(bounds.height(), cell_size);

        let window_ms = window.duration().num_milliseconds();
        let bucket_ms = if bucket_secs <= 0 {
            window_ms
        } else {
            (bucket_secs * 1000).min(window_ms)
        };
        let nt = ((window_ms + bucket_ms - 1) / bucket_ms).max(1) as usize;

        Ok(Self {
            crs,
            bounds,
            dx: cell_size,
            dy: cell_size,
            nx,
            ny,
            window,
            bucket_ms,
            nt,
        })
    }

    /// Lattice for a request region at the configured resolution.
    pub fn for_region(
        region: &Region,
        window: &TimeWindow,
        config: &NormalizerConfig,
    ) -> Result<Self> {
        let crs = region.crs();
        let cell_size = if crs.is_geographic() {
            config.resolution_deg
        } else {
            config.resolution_deg * METERS_PER_DEGREE
        };
        let lattice = Self::new(
            crs,
            region.bounds(),
            cell_size,
            *window,
            config.temporal_bucket_secs,
        )?;
        if lattice.len() > config.max_cells {
            return Err(NormalizationError::LatticeTooLarge {
                cells: lattice.len(),
                max: config.max_cells,
            });
        }
        Ok(lattice)
    }

    pub fn crs(&self) -> CrsCode {
        self.crs
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nt(&self) -> usize {
        self.nt
    }

    pub fn cell_size(&self) -> (f64, f64) {
        (self.dx, self.dy)
    }

    /// Cells per time bucket.
    pub fn spatial_len(&self) -> usize {
        self.nx * self.ny
    }

    /// Total number of cells across all buckets.
    pub fn len(&self) -> usize {
        self.spatial_len() * self.nt
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of cell (i, j) in bucket t.
    pub fn index(&self, i: usize, j: usize, t: usize) -> usize {
        t * self.spatial_len() + j * self.nx + i
    }

    /// Inverse of [`index`](Self::index).
    pub fn position(&self, index: usize) -> (usize, usize, usize) {
        let t = index / self.spatial_len();
        let rem = index % self.spatial_len();
        (rem % self.nx, rem / self.nx, t)
    }

    /// Footprint of cell (i, j), clipped to the lattice bounds.
    pub fn cell_bbox(&self, i: usize, j: usize) -> BoundingBox {
        let min_x = self.bounds.min_x + i as f64 * self.dx;
        let min_y = self.bounds.min_y + j as f64 * self.dy;
        let max_x = if i + 1 == self.nx {
            self.bounds.max_x
        } else {
            min_x + self.dx
        };
        let max_y = if j + 1 == self.ny {
            self.bounds.max_y
        } else {
            min_y + self.dy
        };
        BoundingBox::new(min_x, min_y, max_x.min(self.bounds.max_x), max_y.min(self.bounds.max_y))
    }

    pub fn cell_center(&self, i: usize, j: usize) -> (f64, f64) {
        let b = self.cell_bbox(i, j);
        ((b.min_x + b.max_x) / 2.0, (b.min_y + b.max_y) / 2.0)
    }

    /// Bucket `t` as milliseconds since the window start, `[start, end)`.
    pub fn bucket_ms(&self, t: usize) -> (i64, i64) {
        let start = t as i64 * self.bucket_ms;
        let end = (start + self.bucket_ms).min(self.window_ms());
        (start, end)
    }

    /// Bucket `t` as a time window.
    pub fn bucket(&self, t: usize) -> TimeWindow {
        let (start, end) = self.bucket_ms(t);
        let origin = self.window.start();
        TimeWindow::new(
            origin + Duration::milliseconds(start),
            origin + Duration::milliseconds(end),
        )
        .unwrap_or(self.window)
    }

    pub fn window_ms(&self) -> i64 {
        self.window.duration().num_milliseconds()
    }

    /// Milliseconds from the window start to `dt` (negative before it).
    pub fn offset_ms(&self, dt: DateTime<Utc>) -> i64 {
        (dt - self.window.start()).num_milliseconds()
    }

    /// Inclusive column range touched by `[min_x, max_x]`, if any.
    pub fn columns(&self, min_x: f64, max_x: f64) -> Option<(usize, usize)> {
        axis_range(min_x, max_x, self.bounds.min_x, self.bounds.max_x, self.dx, self.nx)
    }

    /// Inclusive row range touched by `[min_y, max_y]`, if any.
    pub fn rows(&self, min_y: f64, max_y: f64) -> Option<(usize, usize)> {
        axis_range(min_y, max_y, self.bounds.min_y, self.bounds.max_y, self.dy, self.ny)
    }
}

fn count(extent: f64, step: f64) -> usize {
    ((extent / step) - COUNT_EPSILON).ceil().max(1.0) as usize
}

fn axis_range(
    lo: f64,
    hi: f64,
    origin: f64,
    limit: f64,
    step: f64,
    n: usize,
) -> Option<(usize, usize)> {
    if hi <= origin || lo >= limit {
        return None;
    }
    let first = ((lo - origin) / step).floor().max(0.0) as usize;
    let last = ((hi - origin) / step).floor().max(0.0) as usize;
    Some((first.min(n - 1), last.min(n - 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(hours: i64) -> TimeWindow {
        let start = aq_common::time::parse_iso8601("2024-01-01T00:00:00Z").unwrap();
        TimeWindow::new(start, start + Duration::hours(hours)).unwrap()
    }

    #[test]
    fn test_exact_multiple_has_no_sliver() {
        let lattice = Lattice::new(
            CrsCode::Epsg4326,
            BoundingBox::new(0.0, 0.0, 1.0, 0.5),
            0.1,
            window(3),
            3600,
        )
        .unwrap();
        assert_eq!(lattice.nx(), 10);
        assert_eq!(lattice.ny(), 5);
        assert_eq!(lattice.nt(), 3);
        assert_eq!(lattice.len(), 150);
    }

    #[test]
    fn test_edge_cells_are_clipped() {
        let lattice = Lattice::new(
            CrsCode::Epsg4326,
            BoundingBox::new(0.0, 0.0, 2.5, 1.0),
            1.0,
            window(1),
            3600,
        )
        .unwrap();
        assert_eq!(lattice.nx(), 3);
        let last = lattice.cell_bbox(2, 0);
        assert!((last.width() - 0.5).abs() < 1e-12);
        assert_eq!(last.max_x, 2.5);
    }

    #[test]
    fn test_partial_last_bucket() {
        let lattice = Lattice::new(
            CrsCode::Epsg4326,
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            1.0,
            window(5),
            2 * 3600,
        )
        .unwrap();
        assert_eq!(lattice.nt(), 3);
        assert_eq!(lattice.bucket_ms(2), (4 * 3_600_000, 5 * 3_600_000));
    }

    #[test]
    fn test_zero_bucket_spans_window() {
        let lattice = Lattice::new(
            CrsCode::Epsg4326,
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            1.0,
            window(24),
            0,
        )
        .unwrap();
        assert_eq!(lattice.nt(), 1);
        assert_eq!(lattice.bucket(0), window(24));
    }

    #[test]
    fn test_index_position_roundtrip() {
        let lattice = Lattice::new(
            CrsCode::Epsg4326,
            BoundingBox::new(0.0, 0.0, 3.0, 2.0),
            1.0,
            window(2),
            3600,
        )
        .unwrap();
        for idx in 0..lattice.len() {
            let (i, j, t) = lattice.position(idx);
            assert_eq!(lattice.index(i, j, t), idx);
        }
    }

    #[test]
    fn test_column_range() {
        let lattice = Lattice::new(
            CrsCode::Epsg4326,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            1.0,
            window(1),
            3600,
        )
        .unwrap();
        assert_eq!(lattice.columns(2.5, 4.5), Some((2, 4)));
        assert_eq!(lattice.columns(-5.0, 0.5), Some((0, 0)));
        assert_eq!(lattice.columns(9.5, 20.0), Some((9, 9)));
        assert_eq!(lattice.columns(10.0, 11.0), None);
    }

    #[test]
    fn test_too_many_cells_rejected() {
        let region = Region::bbox(BoundingBox::new(-180.0, -90.0, 180.0, 90.0), CrsCode::Epsg4326)
            .unwrap();
        let config = NormalizerConfig {
            resolution_deg: 0.01,
            ..NormalizerConfig::default()
        };
        let err = Lattice::for_region(&region, &window(24), &config).unwrap_err();
        assert!(matches!(err, NormalizationError::LatticeTooLarge { .. }));
    }
}
