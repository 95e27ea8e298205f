//! Index evaluation over normalized grids.

use std::sync::Arc;

use aq_common::{BoundingBox, CrsCode, Granule, Region};
use grid_normalizer::{Grid, GridNormalizer, NormalizerConfig};
use index_computer::{ComputationError, IndexComputer, IndexDefinition, IndexRegistry};
use test_utils::{assert_approx_eq, hours_window, pixel_granule, values};

fn region() -> Region {
    Region::bbox(BoundingBox::new(0.0, 0.0, 2.0, 1.0), CrsCode::Epsg4326).unwrap()
}

fn normalizer() -> GridNormalizer {
    GridNormalizer::new(NormalizerConfig {
        resolution_deg: 1.0,
        min_coverage: 0.5,
        ..NormalizerConfig::default()
    })
}

/// West cell observed for every channel, east cell only for NO2 and O3.
fn grid() -> Grid {
    let window = hours_window(1);
    let west = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let both = BoundingBox::new(0.0, 0.0, 2.0, 1.0);
    let granules: Vec<Granule> = vec![
        pixel_granule("no2", "NO2", both, window, values::NO2_COLUMN),
        pixel_granule("o3", "O3", both, window, 60.0),
        pixel_granule("hcho", "HCHO", west, window, values::HCHO_COLUMN),
    ];
    normalizer().normalize(&granules, &region(), &window).unwrap()
}

// ============================================================================
// Built-in indices
// ============================================================================

#[test]
fn test_single_pollutant_indices() {
    let result = IndexComputer::default()
        .compute(&grid(), &["no2_ppb", "O3_AQI"])
        .unwrap();

    // Column values pass through f32, so compare loosely.
    let no2 = result.index("NO2_PPB").unwrap();
    assert_approx_eq!(no2.get(0).unwrap(), 2.0, 1e-6);
    assert_approx_eq!(no2.get(1).unwrap(), 2.0, 1e-6);
    let o3 = result.index("O3_AQI").unwrap();
    assert_eq!(o3.values, vec![Some(67.0), Some(67.0)]);
    assert_eq!(result.index_names().collect::<Vec<_>>(), vec!["NO2_PPB", "O3_AQI"]);
}

#[test]
fn test_no_data_propagates() {
    let result = IndexComputer::default()
        .compute(&grid(), &["AQI", "AQI_CATEGORY", "HCHO_PPB"])
        .unwrap();

    // The east cell never saw HCHO.
    assert_eq!(result.index("AQI").unwrap().values, vec![Some(67.0), None]);
    assert_eq!(result.index("AQI_CATEGORY").unwrap().values, vec![Some(1.0), None]);
    let hcho = result.index("HCHO_PPB").unwrap();
    assert_approx_eq!(hcho.get(0).unwrap(), 1.0, 1e-6);
    assert_eq!(hcho.get(1), None);
    assert!(result.metadata.partial_coverage);
    assert_eq!(result.metadata.channel_coverage["HCHO"], 0.5);
    assert_eq!(result.metadata.channel_coverage["NO2"], 1.0);
}

#[test]
fn test_metadata_records_versions_and_provenance() {
    let result = IndexComputer::default().compute(&grid(), &["AQI"]).unwrap();
    assert_eq!(result.metadata.formula_versions["AQI"], "epa-breakpoints/1");
    let ids: Vec<_> = result
        .metadata
        .provenance
        .iter()
        .map(|p| p.granule_id.as_str())
        .collect();
    assert_eq!(ids, vec!["hcho", "no2", "o3"]);
    assert!(!result.metadata.partial_fetch);
    assert!(result.clone().with_partial_fetch(true).is_partial());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_missing_channel_fails_fast() {
    let window = hours_window(1);
    let only_no2 = normalizer()
        .normalize(
            [pixel_granule("no2", "NO2", BoundingBox::new(0.0, 0.0, 2.0, 1.0), window, 1.0e15)],
            &region(),
            &window,
        )
        .unwrap();

    let err = IndexComputer::default()
        .compute(&only_no2, &["NO2_AQI", "AQI"])
        .unwrap_err();
    assert_eq!(
        err,
        ComputationError::MissingChannel {
            index: "AQI".to_string(),
            channel: "HCHO".to_string(),
        }
    );
}

#[test]
fn test_unknown_and_empty_index_sets() {
    let computer = IndexComputer::default();
    assert_eq!(
        computer.compute(&grid(), &["PM25"]).unwrap_err(),
        ComputationError::UnknownIndex("PM25".to_string())
    );
    assert_eq!(
        computer.compute::<&str>(&grid(), &[]).unwrap_err(),
        ComputationError::EmptyIndexSet
    );
}

// ============================================================================
// Registry injection and determinism
// ============================================================================

#[test]
fn test_custom_registry() {
    let registry = IndexRegistry::new()
        .with(IndexDefinition::new(
            "RATIO",
            "HCHO to NO2 column ratio",
            &["HCHO", "NO2"],
            "1",
            |v| Some(v[0] / v[1]),
        ))
        .unwrap();
    let computer = IndexComputer::new(Arc::new(registry));

    let result = computer.compute(&grid(), &["ratio"]).unwrap();
    let ratio = result.index("RATIO").unwrap();
    assert_approx_eq!(ratio.get(0).unwrap(), 2.5, 1e-6);
    assert_eq!(ratio.get(1), None);
    assert!(computer.compute(&grid(), &["AQI"]).is_err());
}

#[test]
fn test_results_are_bit_identical() {
    let computer = IndexComputer::default();
    let grid = grid();
    let a = computer.compute(&grid, &["AQI", "NO2_PPB"]).unwrap();
    let b = computer.compute(&grid, &["NO2_PPB", "aqi", "AQI"]).unwrap();
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}
