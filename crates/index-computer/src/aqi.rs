//! EPA-style Air Quality Index arithmetic.
//!
//! `AQI = (I_hi - I_lo) / (C_hi - C_lo) * (C - C_lo) + I_lo`, rounded to the
//! nearest integer.

use serde::{Deserialize, Serialize};

/// One concentration band and the index band it maps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub c_lo: f64,
    pub c_hi: f64,
    pub i_lo: f64,
    pub i_hi: f64,
}

const fn bp(c_lo: f64, c_hi: f64, i_lo: f64, i_hi: f64) -> Breakpoint {
    Breakpoint {
        c_lo,
        c_hi,
        i_lo,
        i_hi,
    }
}

/// NO2, ppb, 1-hour average.
pub const NO2_BREAKPOINTS: &[Breakpoint] = &[
    bp(0.0, 53.0, 0.0, 50.0),
    bp(54.0, 100.0, 51.0, 100.0),
    bp(101.0, 360.0, 101.0, 150.0),
    bp(361.0, 649.0, 151.0, 200.0),
    bp(650.0, 1249.0, 201.0, 300.0),
    bp(1250.0, 2049.0, 301.0, 500.0),
];

/// O3, ppb, 8-hour average.
pub const O3_BREAKPOINTS: &[Breakpoint] = &[
    bp(0.0, 54.0, 0.0, 50.0),
    bp(55.0, 70.0, 51.0, 100.0),
    bp(71.0, 85.0, 101.0, 150.0),
    bp(86.0, 105.0, 151.0, 200.0),
    bp(106.0, 200.0, 201.0, 300.0),
];

/// HCHO, ppb. Health-based approximation; there is no EPA table.
pub const HCHO_BREAKPOINTS: &[Breakpoint] = &[
    bp(0.0, 10.0, 0.0, 50.0),
    bp(11.0, 30.0, 51.0, 100.0),
    bp(31.0, 50.0, 101.0, 150.0),
    bp(51.0, 80.0, 151.0, 200.0),
    bp(81.0, 120.0, 201.0, 300.0),
];

/// Tropospheric NO2 column (molecules/cm^2) to approximate surface ppb.
pub fn no2_column_to_ppb(column: f64) -> f64 {
    column / 2e15
}

/// HCHO column (molecules/cm^2) to approximate ppb.
pub fn hcho_column_to_ppb(column: f64) -> f64 {
    column / 1e16
}

/// Index for `concentration` under `table`.
///
/// Negative or non-finite concentrations have no index. Values between two
/// bands belong to the upper band; values beyond the table take its top.
pub fn aqi_from_breakpoints(concentration: f64, table: &[Breakpoint]) -> Option<f64> {
    if !concentration.is_finite() || concentration < 0.0 {
        return None;
    }
    for band in table {
        if concentration <= band.c_hi {
            let c = concentration.max(band.c_lo);
            let aqi = (band.i_hi - band.i_lo) / (band.c_hi - band.c_lo) * (c - band.c_lo) + band.i_lo;
            return Some(aqi.round());
        }
    }
    table.last().map(|band| band.i_hi)
}

/// AQI category, numbered 0 (good) to 5 (hazardous).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: f64) -> Option<Self> {
        if !aqi.is_finite() {
            return None;
        }
        Some(match aqi {
            a if a <= 50.0 => AqiCategory::Good,
            a if a <= 100.0 => AqiCategory::Moderate,
            a if a <= 150.0 => AqiCategory::UnhealthyForSensitiveGroups,
            a if a <= 200.0 => AqiCategory::Unhealthy,
            a if a <= 300.0 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        })
    }

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    pub fn health_recommendation(&self) -> &'static str {
        match self {
            AqiCategory::Good => {
                "Air quality is satisfactory, and air pollution poses little or no risk."
            }
            AqiCategory::Moderate => {
                "Air quality is acceptable. However, there may be a risk for some people."
            }
            AqiCategory::UnhealthyForSensitiveGroups => {
                "Members of sensitive groups may experience health effects."
            }
            AqiCategory::Unhealthy => {
                "Some members of the general public may experience health effects."
            }
            AqiCategory::VeryUnhealthy => {
                "Health alert: The risk of health effects is increased for everyone."
            }
            AqiCategory::Hazardous => {
                "Health warning of emergency conditions: everyone is more likely to be affected."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        assert_eq!(aqi_from_breakpoints(0.0, NO2_BREAKPOINTS), Some(0.0));
        assert_eq!(aqi_from_breakpoints(53.0, NO2_BREAKPOINTS), Some(50.0));
        assert_eq!(aqi_from_breakpoints(54.0, NO2_BREAKPOINTS), Some(51.0));
        assert_eq!(aqi_from_breakpoints(100.0, NO2_BREAKPOINTS), Some(100.0));
    }

    #[test]
    fn test_interpolation_rounds() {
        // 50/54 * 27 = 25.0
        assert_eq!(aqi_from_breakpoints(27.0, O3_BREAKPOINTS), Some(25.0));
        // 49/15 * (60 - 55) + 51 = 67.33
        assert_eq!(aqi_from_breakpoints(60.0, O3_BREAKPOINTS), Some(67.0));
    }

    #[test]
    fn test_gap_takes_upper_band() {
        assert_eq!(aqi_from_breakpoints(53.5, NO2_BREAKPOINTS), Some(51.0));
        assert_eq!(aqi_from_breakpoints(10.4, HCHO_BREAKPOINTS), Some(51.0));
    }

    #[test]
    fn test_beyond_table_clamps() {
        assert_eq!(aqi_from_breakpoints(5000.0, NO2_BREAKPOINTS), Some(500.0));
        assert_eq!(aqi_from_breakpoints(250.0, O3_BREAKPOINTS), Some(300.0));
    }

    #[test]
    fn test_invalid_concentrations() {
        assert_eq!(aqi_from_breakpoints(-1.0, NO2_BREAKPOINTS), None);
        assert_eq!(aqi_from_breakpoints(f64::NAN, NO2_BREAKPOINTS), None);
        assert_eq!(aqi_from_breakpoints(f64::INFINITY, NO2_BREAKPOINTS), None);
    }

    #[test]
    fn test_column_conversions() {
        assert_eq!(no2_column_to_ppb(4.0e15), 2.0);
        assert_eq!(hcho_column_to_ppb(1.0e16), 1.0);
    }

    #[test]
    fn test_categories() {
        assert_eq!(AqiCategory::from_aqi(50.0), Some(AqiCategory::Good));
        assert_eq!(AqiCategory::from_aqi(51.0), Some(AqiCategory::Moderate));
        assert_eq!(
            AqiCategory::from_aqi(150.0),
            Some(AqiCategory::UnhealthyForSensitiveGroups)
        );
        assert_eq!(AqiCategory::from_aqi(301.0), Some(AqiCategory::Hazardous));
        assert_eq!(AqiCategory::from_aqi(f64::NAN), None);
        assert_eq!(AqiCategory::VeryUnhealthy.number(), 4);
        assert_eq!(AqiCategory::Good.label(), "Good");
    }
}
