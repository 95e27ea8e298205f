//! Common regions, windows and channel values for tests.

use aq_common::{BoundingBox, CrsCode, Region, TimeWindow};

/// Bounding boxes as `(min_lon, min_lat, max_lon, max_lat)`.
pub mod bbox {
    /// Continental United States (TEMPO field of regard, roughly).
    pub const CONUS: (f64, f64, f64, f64) = (-125.0, 24.0, -66.0, 50.0);

    /// A 10 x 10 degree box over the central US.
    pub const TEN_DEGREE: (f64, f64, f64, f64) = (-105.0, 30.0, -95.0, 40.0);

    /// One degree around Houston.
    pub const HOUSTON: (f64, f64, f64, f64) = (-96.0, 29.0, -95.0, 30.0);

    /// Invalid box (min > max).
    pub const INVALID: (f64, f64, f64, f64) = (10.0, 10.0, 5.0, 5.0);
}

/// Timestamps used across tests.
pub mod time {
    pub const DAY_START: &str = "2024-01-01T00:00:00Z";
    pub const DAY_END: &str = "2024-01-02T00:00:00Z";
}

/// Typical raw channel values.
pub mod values {
    /// Tropospheric NO2 column (molecules/cm^2), about 2 ppb.
    pub const NO2_COLUMN: f32 = 4.0e15;
    /// Below-cloud ozone (ppb).
    pub const O3_PPB: f32 = 45.0;
    /// HCHO column (molecules/cm^2), about 1 ppb.
    pub const HCHO_COLUMN: f32 = 1.0e16;
}

/// Build a geographic bbox region from a tuple.
pub fn region_from(b: (f64, f64, f64, f64)) -> Region {
    Region::bbox(BoundingBox::new(b.0, b.1, b.2, b.3), CrsCode::Epsg4326)
        .expect("fixture region is valid")
}

/// The 10 x 10 degree test region.
pub fn ten_degree_region() -> Region {
    region_from(bbox::TEN_DEGREE)
}

/// `[2024-01-01, 2024-01-02)`.
pub fn day_window() -> TimeWindow {
    TimeWindow::parse(&format!("{}/{}", time::DAY_START, time::DAY_END))
        .expect("fixture window is valid")
}

/// Window starting at `DAY_START` lasting `hours`.
pub fn hours_window(hours: i64) -> TimeWindow {
    let start = aq_common::time::parse_iso8601(time::DAY_START).expect("fixture time is valid");
    TimeWindow::new(start, start + chrono::Duration::hours(hours)).expect("positive duration")
}

/// Default raw value for a channel, `None` for unknown channels.
pub fn channel_value(channel: &str) -> Option<f32> {
    match channel.to_ascii_uppercase().as_str() {
        "NO2" => Some(values::NO2_COLUMN),
        "O3" => Some(values::O3_PPB),
        "HCHO" => Some(values::HCHO_COLUMN),
        _ => None,
    }
}
