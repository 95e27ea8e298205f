//! End-to-end normalization behavior.

use aq_common::{BoundingBox, CrsCode, Granule, Region, TimeWindow};
use grid_normalizer::{GridNormalizer, NormalizationError, NormalizerConfig, ReducerKind};
use test_utils::{assert_approx_eq, gradient_granule, hours_window, pixel_granule, uniform_granule};

fn unit_region() -> Region {
    Region::bbox(BoundingBox::new(0.0, 0.0, 1.0, 1.0), CrsCode::Epsg4326).unwrap()
}

fn normalizer(min_coverage: f64) -> GridNormalizer {
    GridNormalizer::new(NormalizerConfig {
        resolution_deg: 1.0,
        temporal_bucket_secs: 3600,
        min_coverage,
        ..NormalizerConfig::default()
    })
}

fn minutes(from: i64, to: i64) -> TimeWindow {
    let start = hours_window(1).start();
    TimeWindow::new(
        start + chrono::Duration::minutes(from),
        start + chrono::Duration::minutes(to),
    )
    .unwrap()
}

// ============================================================================
// Coverage
// ============================================================================

#[test]
fn test_forty_percent_unobserved_is_no_data() {
    // Observed for 36 of 60 minutes: coverage 0.6 against a 0.6 threshold.
    let granule = pixel_granule("g1", "NO2", BoundingBox::new(0.0, 0.0, 1.0, 1.0), minutes(0, 36), 5.0);
    let grid = normalizer(0.6)
        .normalize([granule], &unit_region(), &hours_window(1))
        .unwrap();

    let cell = grid.channel("NO2").unwrap().cells()[0];
    assert_eq!(cell.coverage, 0.6);
    assert_eq!(cell.value, None);
    assert!(grid.partial_coverage());
}

#[test]
fn test_full_coverage_keeps_value() {
    let granule = pixel_granule("g1", "NO2", BoundingBox::new(-1.0, -1.0, 2.0, 2.0), minutes(0, 60), 5.0);
    let grid = normalizer(0.6)
        .normalize([granule], &unit_region(), &hours_window(1))
        .unwrap();

    let cell = grid.channel("NO2").unwrap().cells()[0];
    assert_eq!(cell.coverage, 1.0);
    assert_eq!(cell.value, Some(5.0));
    assert!(!grid.partial_coverage());
}

#[test]
fn test_overlapping_granules_not_double_counted() {
    let footprint = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let a = pixel_granule("a", "NO2", footprint, minutes(0, 30), 2.0);
    let b = pixel_granule("b", "NO2", footprint, minutes(10, 30), 4.0);
    let grid = normalizer(0.4)
        .normalize([a, b], &unit_region(), &hours_window(1))
        .unwrap();

    let cell = grid.channel("NO2").unwrap().cells()[0];
    assert_eq!(cell.coverage, 0.5);
    // Weights follow temporal overlap: 30 min vs 20 min.
    assert_approx_eq!(cell.value.unwrap(), (2.0 * 0.5 + 4.0 * (20.0 / 60.0)) / (0.5 + 20.0 / 60.0), 1e-12);
}

#[test]
fn test_missing_pixels_reduce_coverage() {
    let mut granule = gradient_granule("g1", "HCHO", BoundingBox::new(0.0, 0.0, 1.0, 1.0), minutes(0, 60), 2, 2);
    granule.missing[0] = true; // north-west pixel
    let grid = normalizer(0.5)
        .normalize([granule], &unit_region(), &hours_window(1))
        .unwrap();

    let cell = grid.channel("HCHO").unwrap().cells()[0];
    assert_eq!(cell.coverage, 0.75);
    // Remaining pixels: (1,0)=1000, (0,1)=1, (1,1)=1001, equal weights.
    assert_approx_eq!(cell.value.unwrap(), 2002.0 / 3.0, 1e-9);
}

#[test]
fn test_later_buckets_without_observations_are_empty() {
    let granule = pixel_granule("g1", "O3", BoundingBox::new(0.0, 0.0, 1.0, 1.0), minutes(0, 60), 40.0);
    let grid = normalizer(0.5)
        .normalize([granule], &unit_region(), &hours_window(3))
        .unwrap();

    assert_eq!(grid.lattice().nt(), 3);
    let cells = grid.channel("O3").unwrap().cells();
    assert_eq!(cells[0].value, Some(40.0));
    assert_eq!(cells[1].value, None);
    assert_eq!(cells[2].coverage, 0.0);
    assert!(grid.partial_coverage());
}

// ============================================================================
// Reduction
// ============================================================================

#[test]
fn test_mean_weighted_by_spatial_overlap() {
    let west = pixel_granule("west", "NO2", BoundingBox::new(0.0, 0.0, 0.5, 1.0), minutes(0, 60), 10.0);
    let east = pixel_granule("east", "NO2", BoundingBox::new(0.5, 0.0, 1.0, 1.0), minutes(0, 60), 20.0);
    let grid = normalizer(0.5)
        .normalize([west, east], &unit_region(), &hours_window(1))
        .unwrap();

    let cell = grid.channel("NO2").unwrap().cells()[0];
    assert_eq!(cell.coverage, 1.0);
    assert_eq!(cell.value, Some(15.0));
}

#[test]
fn test_nearest_in_time_reducer() {
    let footprint = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let early = pixel_granule("early", "NO2", footprint, minutes(0, 10), 1.0);
    let middle = pixel_granule("middle", "NO2", footprint, minutes(25, 35), 7.0);
    let late = pixel_granule("late", "NO2", footprint, minutes(50, 60), 3.0);
    let grid = GridNormalizer::new(NormalizerConfig {
        resolution_deg: 1.0,
        min_coverage: 0.0,
        reducer: ReducerKind::NearestInTime,
        ..NormalizerConfig::default()
    })
    .normalize([early, middle, late], &unit_region(), &hours_window(1))
    .unwrap();

    assert_eq!(grid.channel("NO2").unwrap().value(0), Some(7.0));
}

// ============================================================================
// Determinism
// ============================================================================

fn scattered_granules() -> Vec<Granule> {
    let mut granules = Vec::new();
    for (n, (x, y)) in [(0.0, 0.0), (0.3, 0.2), (0.55, 0.45), (1.2, 0.9), (1.7, 1.4)]
        .into_iter()
        .enumerate()
    {
        let id = format!("g{}", n);
        let window = minutes(n as i64 * 10, n as i64 * 10 + 45);
        granules.push(gradient_granule(
            &id,
            "NO2",
            BoundingBox::new(x, y, x + 0.9, y + 0.7),
            window,
            3,
            2,
        ));
        granules.push(uniform_granule(
            &format!("{}-o3", id),
            "O3",
            BoundingBox::new(x, y, x + 0.6, y + 0.6),
            window,
            2,
            2,
            30.0 + n as f32 * 1.37,
        ));
    }
    granules
}

#[test]
fn test_normalization_is_order_independent() {
    let region = Region::bbox(BoundingBox::new(0.0, 0.0, 2.5, 2.0), CrsCode::Epsg4326).unwrap();
    let window = hours_window(2);
    let normalizer = GridNormalizer::new(NormalizerConfig {
        resolution_deg: 0.25,
        temporal_bucket_secs: 1800,
        min_coverage: 0.1,
        ..NormalizerConfig::default()
    });

    let granules = scattered_granules();
    let forward = normalizer.normalize(&granules, &region, &window).unwrap();
    let again = normalizer.normalize(&granules, &region, &window).unwrap();
    let mut reversed = granules.clone();
    reversed.reverse();
    let backward = normalizer.normalize(&reversed, &region, &window).unwrap();
    let mut rotated = granules.clone();
    rotated.rotate_left(3);
    let shuffled = normalizer.normalize(&rotated, &region, &window).unwrap();

    assert_eq!(forward, again);
    assert_eq!(forward, backward);
    assert_eq!(forward, shuffled);
    for (a, b) in forward
        .channel("NO2")
        .unwrap()
        .cells()
        .iter()
        .zip(backward.channel("NO2").unwrap().cells())
    {
        assert_eq!(a.value.map(f64::to_bits), b.value.map(f64::to_bits));
        assert_eq!(a.coverage.to_bits(), b.coverage.to_bits());
    }
}

// ============================================================================
// Geometry and CRS
// ============================================================================

#[test]
fn test_polygon_cells_outside_are_excluded() {
    let region = Region::polygon(&[(0.0, 0.0), (3.5, 0.0), (0.0, 3.5)], CrsCode::Epsg4326).unwrap();
    let granule = pixel_granule("g1", "NO2", BoundingBox::new(0.0, 0.0, 3.5, 3.5), minutes(0, 60), 9.0);
    let grid = normalizer(0.5)
        .normalize([granule], &region, &hours_window(1))
        .unwrap();

    assert_eq!(grid.region_mask().iter().filter(|inside| **inside).count(), 6);
    let channel = grid.channel("NO2").unwrap();
    let lattice = grid.lattice();
    // Far corner lies outside the triangle.
    assert_eq!(channel.value(lattice.index(3, 3, 0)), None);
    assert_eq!(channel.value(lattice.index(0, 0, 0)), Some(9.0));
    assert!(!grid.partial_coverage());
}

#[test]
fn test_mercator_granule_on_geographic_lattice() {
    let (x0, y0) = aq_common::crs::lonlat_to_mercator(-1.0, -1.0);
    let (x1, y1) = aq_common::crs::lonlat_to_mercator(2.0, 2.0);
    let mut granule = pixel_granule("merc", "NO2", BoundingBox::new(x0, y0, x1, y1), minutes(0, 60), 3.0);
    granule.crs = "EPSG:3857".to_string();

    let grid = normalizer(0.5)
        .normalize([granule], &unit_region(), &hours_window(1))
        .unwrap();
    assert_eq!(grid.channel("NO2").unwrap().value(0), Some(3.0));
}

#[test]
fn test_unparseable_crs_rejected() {
    let mut granule = pixel_granule("bad", "NO2", BoundingBox::new(0.0, 0.0, 1.0, 1.0), minutes(0, 60), 1.0);
    granule.crs = "EPSG:99999".to_string();
    let err = normalizer(0.5)
        .normalize([granule], &unit_region(), &hours_window(1))
        .unwrap_err();
    assert!(matches!(err, NormalizationError::UnparseableCrs { .. }));
}

#[test]
fn test_incompatible_crs_rejected() {
    let mut granule = pixel_granule("albers", "NO2", BoundingBox::new(0.0, 0.0, 1000.0, 1000.0), minutes(0, 60), 1.0);
    granule.crs = "EPSG:5070".to_string();
    let err = normalizer(0.5)
        .normalize([granule], &unit_region(), &hours_window(1))
        .unwrap_err();
    assert!(matches!(err, NormalizationError::IncompatibleCrs { .. }));
}

#[test]
fn test_malformed_granule_rejected() {
    let mut granule = pixel_granule("short", "NO2", BoundingBox::new(0.0, 0.0, 1.0, 1.0), minutes(0, 60), 1.0);
    granule.width = 2;
    let err = normalizer(0.5)
        .normalize([granule], &unit_region(), &hours_window(1))
        .unwrap_err();
    assert!(matches!(err, NormalizationError::MalformedGranule { .. }));
}

#[test]
fn test_no_granules_rejected() {
    let err = normalizer(0.5)
        .normalize(Vec::<Granule>::new(), &unit_region(), &hours_window(1))
        .unwrap_err();
    assert_eq!(err, NormalizationError::NoGranules);
}

#[test]
fn test_incremental_accumulation_matches_batch() {
    let normalizer = normalizer(0.2);
    let granules = scattered_granules();
    let region = Region::bbox(BoundingBox::new(0.0, 0.0, 2.0, 2.0), CrsCode::Epsg4326).unwrap();

    let mut acc = normalizer.accumulator(&region, &hours_window(1)).unwrap();
    for g in granules.iter().rev() {
        acc.push(g).unwrap();
    }
    assert_eq!(acc.granule_count(), granules.len());
    let incremental = acc.finish().unwrap();
    let batch = normalizer.normalize(&granules, &region, &hours_window(1)).unwrap();
    assert_eq!(incremental, batch);
}
