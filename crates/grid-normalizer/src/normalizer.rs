//! One-shot normalization entry point.

use std::borrow::Borrow;
use std::sync::Arc;
use tracing::instrument;

use aq_common::{Granule, Region, TimeWindow};

use crate::accumulator::GridAccumulator;
use crate::config::NormalizerConfig;
use crate::error::{NormalizationError, Result};
use crate::grid::Grid;
use crate::reducer::Reducer;

/// Normalizes granules onto the lattice of a request.
#[derive(Clone)]
pub struct GridNormalizer {
    config: NormalizerConfig,
    reducer: Arc<dyn Reducer>,
}

impl GridNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let reducer = config.reducer.into_reducer();
        Self { config, reducer }
    }

    /// Use a custom reducer instead of the configured built-in one.
    pub fn with_reducer(mut self, reducer: Arc<dyn Reducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Start an incremental normalization.
    pub fn accumulator(&self, region: &Region, window: &TimeWindow) -> Result<GridAccumulator> {
        Ok(GridAccumulator::new(region, window, self.config.clone())?
            .with_reducer(self.reducer.clone()))
    }

    /// Normalize a complete granule set.
    #[instrument(skip_all, fields(region = %region, window = %window))]
    pub fn normalize<I, G>(&self, granules: I, region: &Region, window: &TimeWindow) -> Result<Grid>
    where
        I: IntoIterator<Item = G>,
        G: Borrow<Granule>,
    {
        let mut acc = self.accumulator(region, window)?;
        for granule in granules {
            acc.push(granule.borrow())?;
        }
        if acc.granule_count() == 0 {
            return Err(NormalizationError::NoGranules);
        }
        acc.finish()
    }
}

impl Default for GridNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

/// Normalize `granules` at `resolution` degrees with default settings otherwise.
pub fn normalize<I, G>(
    granules: I,
    region: &Region,
    window: &TimeWindow,
    resolution: f64,
) -> Result<Grid>
where
    I: IntoIterator<Item = G>,
    G: Borrow<Granule>,
{
    GridNormalizer::new(NormalizerConfig {
        resolution_deg: resolution,
        ..NormalizerConfig::default()
    })
    .normalize(granules, region, window)
}
