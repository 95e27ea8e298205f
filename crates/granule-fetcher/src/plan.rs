//! Splitting a request into provider-sized sub-queries.

use aq_common::{CrsCode, Region, TimeWindow};

use crate::config::FetcherConfig;
use crate::error::FetchError;
use crate::provider::SubQuery;

/// Plan the sub-queries for `channels` over `region` and `window`.
///
/// The region's bounds are expressed in EPSG:4326 and tiled so that no tile
/// exceeds `max_extent_deg` on either axis; the window is cut into spans no
/// longer than `max_time_span`. Numbering runs channel by channel (in the
/// order given), then span by span, then tile by tile, so the same inputs
/// always give the same plan.
pub fn plan_subqueries(
    config: &FetcherConfig,
    region: &Region,
    window: &TimeWindow,
    channels: &[String],
) -> Result<Vec<SubQuery>, FetchError> {
    let bounds = region
        .crs()
        .reproject_bbox(CrsCode::Epsg4326, &region.bounds())
        .ok_or_else(|| {
            FetchError::new(
                crate::error::FetchErrorKind::UnsupportedRegionCrs,
                format!("cannot express {} bounds in EPSG:4326", region.crs()),
            )
        })?;

    let tiles = bounds.split(config.max_extent_deg);
    let spans = window.split(config.max_time_span());

    let mut queries = Vec::with_capacity(channels.len() * tiles.len() * spans.len());
    for channel in channels {
        let dataset = config
            .dataset_for(channel)
            .ok_or_else(|| FetchError::unknown_channel(channel))?;
        for span in &spans {
            for tile in &tiles {
                queries.push(SubQuery {
                    index: queries.len(),
                    dataset: dataset.clone(),
                    bbox: *tile,
                    crs: CrsCode::Epsg4326,
                    window: *span,
                });
            }
        }
    }
    Ok(queries)
}
