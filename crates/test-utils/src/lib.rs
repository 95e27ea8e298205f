//! Shared test utilities for the air-quality pipeline workspace.
//!
//! This crate provides:
//! - A scripted [`MockProvider`] that counts submissions and injects failures
//! - Synthetic granule generators
//! - Common regions, windows and channel values
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod mock_provider;

pub use fixtures::*;
pub use generators::*;
pub use mock_provider::MockProvider;

/// Assert two numbers agree within `epsilon` (default `1e-9`).
///
/// Channel values are `f32` in granules and `f64` in grids, so both sides
/// are widened before comparing.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(grid.value(0).unwrap(), 2.0, 1e-6);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr) => {
        $crate::assert_approx_eq!($left, $right, 1e-9)
    };
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (left, right, epsilon) = ($left as f64, $right as f64, $epsilon as f64);
        if !((left - right).abs() <= epsilon) {
            panic!(
                "assertion failed: {} ≈ {} (|{:?} - {:?}| > {:?})",
                stringify!($left),
                stringify!($right),
                left,
                right,
                epsilon
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(4.0e15_f32 / 2.0e15_f32, 2.0);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_rejects_nan() {
        assert_approx_eq!(f64::NAN, 1.0, 0.5);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }
}
