//! Request regions: a bounding geometry plus its coordinate reference system.
//!
//! A [`Region`] is immutable once constructed. Polygon rings are brought into
//! a canonical form at construction (closing vertex dropped, counter-clockwise
//! orientation, starting at the lowest vertex), so two regions describing the
//! same area serialize identically no matter where the caller started the
//! ring or which way it was wound.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::{BoundingBox, CrsCode};

/// Vertices closer than this (in CRS units) are treated as the same point.
const VERTEX_EPSILON: f64 = 1e-9;

/// The spatial part of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    BoundingBox(BoundingBox),
    Polygon { ring: Vec<(f64, f64)> },
}

/// Serialized form accepted on input; validated into a [`Region`].
#[derive(Debug, Clone, Deserialize)]
pub struct RegionSpec {
    pub geometry: Geometry,
    pub crs: CrsCode,
}

/// A validated, canonical request region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegionSpec")]
pub struct Region {
    geometry: Geometry,
    crs: CrsCode,
}

impl Region {
    /// Region covering an axis-aligned box.
    pub fn bbox(bbox: BoundingBox, crs: CrsCode) -> Result<Self, RegionError> {
        validate_bbox(&bbox, crs)?;
        Ok(Self {
            geometry: Geometry::BoundingBox(bbox),
            crs,
        })
    }

    /// Region covering a simple polygon given by its outer ring.
    ///
    /// The ring may be open or closed and wound either way. An axis-aligned
    /// rectangle collapses to the equivalent bounding-box region.
    pub fn polygon(points: &[(f64, f64)], crs: CrsCode) -> Result<Self, RegionError> {
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(RegionError::NonFinite);
        }

        let ring = canonical_ring(points);
        if ring.len() < 3 {
            return Err(RegionError::TooFewVertices(ring.len()));
        }
        if signed_area(&ring).abs() <= VERTEX_EPSILON {
            return Err(RegionError::Empty);
        }

        let bounds = BoundingBox::from_points(&ring).ok_or(RegionError::Empty)?;
        validate_bbox(&bounds, crs)?;

        if is_axis_aligned_rectangle(&ring, &bounds) {
            return Ok(Self {
                geometry: Geometry::BoundingBox(bounds),
                crs,
            });
        }

        Ok(Self {
            geometry: Geometry::Polygon { ring },
            crs,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn crs(&self) -> CrsCode {
        self.crs
    }

    /// Axis-aligned bounds of the geometry.
    pub fn bounds(&self) -> BoundingBox {
        match &self.geometry {
            Geometry::BoundingBox(bbox) => *bbox,
            Geometry::Polygon { ring } => {
                BoundingBox::from_points(ring).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
            }
        }
    }

    /// Area in squared CRS units.
    pub fn area(&self) -> f64 {
        match &self.geometry {
            Geometry::BoundingBox(bbox) => bbox.area(),
            Geometry::Polygon { ring } => signed_area(ring).abs(),
        }
    }

    /// Point-in-region test (even-odd rule for polygons).
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        match &self.geometry {
            Geometry::BoundingBox(bbox) => bbox.contains_point(x, y),
            Geometry::Polygon { ring } => point_in_ring(ring, x, y),
        }
    }

    /// Whether the whole bounds lattice belongs to the region.
    pub fn is_rectangular(&self) -> bool {
        matches!(self.geometry, Geometry::BoundingBox(_))
    }

    /// Canonical, order-independent textual form used for cache keys.
    ///
    /// Coordinates are quantized to 6 decimals.
    pub fn canonical_string(&self) -> String {
        match &self.geometry {
            Geometry::BoundingBox(bbox) => format!(
                "bbox:{}:{:.6},{:.6},{:.6},{:.6}",
                self.crs, bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y
            ),
            Geometry::Polygon { ring } => {
                let vertices: Vec<String> = ring
                    .iter()
                    .map(|(x, y)| format!("{:.6},{:.6}", x, y))
                    .collect();
                format!("polygon:{}:{}", self.crs, vertices.join(";"))
            }
        }
    }
}

impl TryFrom<RegionSpec> for Region {
    type Error = RegionError;

    fn try_from(spec: RegionSpec) -> Result<Self, Self::Error> {
        match spec.geometry {
            Geometry::BoundingBox(bbox) => Region::bbox(bbox, spec.crs),
            Geometry::Polygon { ring } => Region::polygon(&ring, spec.crs),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

fn validate_bbox(bbox: &BoundingBox, crs: CrsCode) -> Result<(), RegionError> {
    if !bbox.is_finite() {
        return Err(RegionError::NonFinite);
    }
    if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
        return Err(RegionError::Empty);
    }
    let valid = crs.valid_bounds();
    if !valid.contains(bbox) {
        return Err(RegionError::OutOfBounds {
            crs,
            bounds: bbox.cache_key(),
        });
    }
    Ok(())
}

/// Drop closing and repeated vertices, orient counter-clockwise, and rotate
/// so the lexicographically smallest vertex comes first.
fn canonical_ring(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut ring: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for &p in points {
        if ring.last().map_or(true, |last| !same_vertex(*last, p)) {
            ring.push(p);
        }
    }
    while ring.len() > 1 && same_vertex(ring[0], ring[ring.len() - 1]) {
        ring.pop();
    }
    if ring.len() < 3 {
        return ring;
    }

    if signed_area(&ring) < 0.0 {
        ring.reverse();
    }

    let start = ring
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| compare_vertex(**a, **b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    ring.rotate_left(start);
    ring
}

fn same_vertex(a: (f64, f64), b: (f64, f64)) -> bool {
    (a.0 - b.0).abs() <= VERTEX_EPSILON && (a.1 - b.1).abs() <= VERTEX_EPSILON
}

fn compare_vertex(a: (f64, f64), b: (f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1))
}

/// Shoelace formula; positive for counter-clockwise rings.
fn signed_area(ring: &[(f64, f64)]) -> f64 {
    let n = ring.len();
    let mut twice = 0.0;
    for i in 0..n {
        let (x1, y1) = ring[i];
        let (x2, y2) = ring[(i + 1) % n];
        twice += x1 * y2 - x2 * y1;
    }
    twice / 2.0
}

fn is_axis_aligned_rectangle(ring: &[(f64, f64)], bounds: &BoundingBox) -> bool {
    ring.len() == 4
        && ring.iter().all(|&(x, y)| {
            ((x - bounds.min_x).abs() <= VERTEX_EPSILON || (x - bounds.max_x).abs() <= VERTEX_EPSILON)
                && ((y - bounds.min_y).abs() <= VERTEX_EPSILON
                    || (y - bounds.max_y).abs() <= VERTEX_EPSILON)
        })
        && (signed_area(ring).abs() - bounds.area()).abs() <= VERTEX_EPSILON
}

fn point_in_ring(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let n = ring.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegionError {
    #[error("region coordinates must be finite numbers")]
    NonFinite,

    #[error("region has zero area")]
    Empty,

    #[error("polygon needs at least 3 distinct vertices, got {0}")]
    TooFewVertices(usize),

    #[error("region {bounds} lies outside the valid bounds of {crs}")]
    OutOfBounds { crs: CrsCode, bounds: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: [(f64, f64); 3] = [(0.0, 0.0), (4.0, 0.0), (0.0, 3.0)];

    #[test]
    fn test_polygon_rotation_is_canonical() {
        let a = Region::polygon(&TRIANGLE, CrsCode::Epsg4326).unwrap();
        let b = Region::polygon(&[TRIANGLE[1], TRIANGLE[2], TRIANGLE[0]], CrsCode::Epsg4326)
            .unwrap();
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn test_polygon_winding_is_canonical() {
        let a = Region::polygon(&TRIANGLE, CrsCode::Epsg4326).unwrap();
        let reversed: Vec<_> = TRIANGLE.iter().rev().copied().collect();
        let b = Region::polygon(&reversed, CrsCode::Epsg4326).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_closed_ring_equals_open_ring() {
        let mut closed = TRIANGLE.to_vec();
        closed.push(TRIANGLE[0]);
        let a = Region::polygon(&closed, CrsCode::Epsg4326).unwrap();
        let b = Region::polygon(&TRIANGLE, CrsCode::Epsg4326).unwrap();
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn test_rectangle_polygon_collapses_to_bbox() {
        let poly = Region::polygon(
            &[(10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)],
            CrsCode::Epsg4326,
        )
        .unwrap();
        let bbox =
            Region::bbox(BoundingBox::new(0.0, 0.0, 10.0, 10.0), CrsCode::Epsg4326).unwrap();
        assert_eq!(poly, bbox);
        assert!(poly.is_rectangular());
    }

    #[test]
    fn test_invalid_regions() {
        assert_eq!(
            Region::bbox(BoundingBox::new(1.0, 1.0, 1.0, 2.0), CrsCode::Epsg4326),
            Err(RegionError::Empty)
        );
        assert!(matches!(
            Region::bbox(BoundingBox::new(-200.0, 0.0, 0.0, 10.0), CrsCode::Epsg4326),
            Err(RegionError::OutOfBounds { .. })
        ));
        assert_eq!(
            Region::polygon(&[(0.0, 0.0), (1.0, 1.0)], CrsCode::Epsg4326),
            Err(RegionError::TooFewVertices(2))
        );
        assert_eq!(
            Region::polygon(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)], CrsCode::Epsg4326),
            Err(RegionError::Empty)
        );
        assert_eq!(
            Region::polygon(&[(0.0, f64::NAN), (1.0, 1.0), (2.0, 0.0)], CrsCode::Epsg4326),
            Err(RegionError::NonFinite)
        );
    }

    #[test]
    fn test_point_in_polygon() {
        let region = Region::polygon(&TRIANGLE, CrsCode::Epsg4326).unwrap();
        assert!(region.contains_point(1.0, 1.0));
        assert!(!region.contains_point(3.5, 2.5));
        assert!((region.area() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"geometry":{"type":"bounding_box","min_x":0,"min_y":0,"max_x":0,"max_y":1},"crs":"Epsg4326"}"#;
        assert!(serde_json::from_str::<Region>(json).is_err());

        let json = r#"{"geometry":{"type":"polygon","ring":[[0,3],[0,0],[4,0]]},"crs":"Epsg4326"}"#;
        let region: Region = serde_json::from_str(json).unwrap();
        assert_eq!(
            region,
            Region::polygon(&TRIANGLE, CrsCode::Epsg4326).unwrap()
        );
    }
}
