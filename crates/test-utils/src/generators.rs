//! Synthetic granule generators.
//!
//! Granules carry fixed ids so test results are reproducible.

use aq_common::{BoundingBox, Granule, TimeWindow};

/// Row-major grid where each value is `col * 1000 + row`.
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid[1], 1000.0);
/// assert_eq!(grid[10], 1.0);
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Granule of `width x height` pixels all holding `value`.
pub fn uniform_granule(
    id: &str,
    channel: &str,
    footprint: BoundingBox,
    coverage: TimeWindow,
    width: usize,
    height: usize,
    value: f32,
) -> Granule {
    Granule::new(
        channel,
        footprint,
        "EPSG:4326",
        coverage,
        width,
        height,
        vec![value; width * height],
        "test-collection",
    )
    .with_granule_id(id)
}

/// Single-pixel granule over `footprint`.
pub fn pixel_granule(
    id: &str,
    channel: &str,
    footprint: BoundingBox,
    coverage: TimeWindow,
    value: f32,
) -> Granule {
    uniform_granule(id, channel, footprint, coverage, 1, 1, value)
}

/// Granule whose values follow [`create_test_grid`].
pub fn gradient_granule(
    id: &str,
    channel: &str,
    footprint: BoundingBox,
    coverage: TimeWindow,
    width: usize,
    height: usize,
) -> Granule {
    Granule::new(
        channel,
        footprint,
        "EPSG:4326",
        coverage,
        width,
        height,
        create_test_grid(width, height),
        "test-collection",
    )
    .with_granule_id(id)
}

/// Mark every `stride`-th sample (row-major) as missing.
pub fn with_gaps(granule: Granule, stride: usize) -> Granule {
    let stride = stride.max(1);
    let missing = (0..granule.values.len()).map(|i| i % stride == 0).collect();
    granule.with_missing(missing)
}
