//! Coordinate Reference System types and utilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::BoundingBox;

/// Web Mercator half-extent in meters.
const MERCATOR_MAX_EXTENT: f64 = 20037508.342789244;

/// WGS84 semi-major axis used by the spherical Web Mercator projection.
const EARTH_RADIUS_M: f64 = 6378137.0;

/// Latitude limit of the Web Mercator square.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Well-known CRS codes understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lat/lon in degrees)
    Epsg4326,
    /// Web Mercator (meters)
    Epsg3857,
    /// NAD83 Geographic
    Epsg4269,
    /// CONUS Albers Equal Area
    Epsg5070,
    /// Polar Stereographic North
    Epsg3413,
    /// Polar Stereographic South
    Epsg3031,
}

impl CrsCode {
    /// Parse a CRS string as providers and callers spell it.
    ///
    /// Accepts formats like:
    /// - "EPSG:4326"
    /// - "epsg:4326"
    /// - "CRS:84" (equivalent to EPSG:4326 with lon/lat axis order)
    pub fn parse(s: &str) -> Result<Self, CrsParseError> {
        let normalized = s.trim().to_uppercase();

        match normalized.as_str() {
            "EPSG:4326" | "CRS:84" | "WGS84" => Ok(CrsCode::Epsg4326),
            "EPSG:3857" | "EPSG:900913" => Ok(CrsCode::Epsg3857),
            "EPSG:4269" => Ok(CrsCode::Epsg4269),
            "EPSG:5070" => Ok(CrsCode::Epsg5070),
            "EPSG:3413" => Ok(CrsCode::Epsg3413),
            "EPSG:3031" => Ok(CrsCode::Epsg3031),
            _ => Err(CrsParseError::UnsupportedCrs(s.to_string())),
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsCode::Epsg4326 | CrsCode::Epsg4269)
    }

    /// Get the valid bounds for this CRS.
    pub fn valid_bounds(&self) -> BoundingBox {
        match self {
            CrsCode::Epsg4326 | CrsCode::Epsg4269 => BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            CrsCode::Epsg3857 => BoundingBox::new(
                -MERCATOR_MAX_EXTENT,
                -MERCATOR_MAX_EXTENT,
                MERCATOR_MAX_EXTENT,
                MERCATOR_MAX_EXTENT,
            ),
            CrsCode::Epsg5070 => BoundingBox::new(-2500000.0, -2500000.0, 2500000.0, 2500000.0),
            CrsCode::Epsg3413 | CrsCode::Epsg3031 => {
                BoundingBox::new(-4000000.0, -4000000.0, 4000000.0, 4000000.0)
            }
        }
    }

    /// Whether coordinates in `self` can be transformed into `target`.
    ///
    /// Only the geographic datums (treated as equivalent at grid resolution)
    /// and spherical Web Mercator are supported.
    pub fn can_reproject_to(&self, target: CrsCode) -> bool {
        let supported = |c: &CrsCode| c.is_geographic() || *c == CrsCode::Epsg3857;
        *self == target || (supported(self) && supported(&target))
    }

    /// Transform a point from `self` into `target`.
    ///
    /// Returns `None` when the pair is unsupported.
    pub fn reproject_point(&self, target: CrsCode, x: f64, y: f64) -> Option<(f64, f64)> {
        if *self == target || (self.is_geographic() && target.is_geographic()) {
            return Some((x, y));
        }
        match (self.is_geographic(), *self, target) {
            (true, _, CrsCode::Epsg3857) => Some(lonlat_to_mercator(x, y)),
            (false, CrsCode::Epsg3857, t) if t.is_geographic() => Some(mercator_to_lonlat(x, y)),
            _ => None,
        }
    }

    /// Transform a bounding box. Both supported transforms are separable
    /// per axis, so transforming the corners is exact.
    pub fn reproject_bbox(&self, target: CrsCode, bbox: &BoundingBox) -> Option<BoundingBox> {
        let (min_x, min_y) = self.reproject_point(target, bbox.min_x, bbox.min_y)?;
        let (max_x, max_y) = self.reproject_point(target, bbox.max_x, bbox.max_y)?;
        Some(BoundingBox::new(min_x, min_y, max_x, max_y))
    }
}

/// Forward spherical Mercator (degrees to meters).
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Inverse spherical Mercator (meters to degrees).
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

impl FromStr for CrsCode {
    type Err = CrsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrsCode::parse(s)
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CrsCode::Epsg4326 => "EPSG:4326",
            CrsCode::Epsg3857 => "EPSG:3857",
            CrsCode::Epsg4269 => "EPSG:4269",
            CrsCode::Epsg5070 => "EPSG:5070",
            CrsCode::Epsg3413 => "EPSG:3413",
            CrsCode::Epsg3031 => "EPSG:3031",
        };
        write!(f, "{}", code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),
}
