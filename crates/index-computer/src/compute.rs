//! Evaluation of registered indices over a [`Grid`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use aq_common::Provenance;
use grid_normalizer::{Grid, Lattice};

use crate::error::{ComputationError, Result};
use crate::registry::{IndexDefinition, IndexRegistry};

/// Values of one index, indexed like [`Lattice::index`]. `None` is "no data".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexGrid {
    pub values: Vec<Option<f64>>,
}

impl IndexGrid {
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Largest value present, if any.
    pub fn max(&self) -> Option<f64> {
        self.values.iter().flatten().copied().reduce(f64::max)
    }
}

/// What went into a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Formula version of each computed index.
    pub formula_versions: BTreeMap<String, String>,
    /// Granules the grid was built from.
    pub provenance: Vec<Provenance>,
    /// Some in-region cell was not fully observed.
    pub partial_coverage: bool,
    /// Some sub-query failed and the result was built from what arrived.
    pub partial_fetch: bool,
    /// Mean in-region coverage per input channel.
    pub channel_coverage: BTreeMap<String, f64>,
}

/// Indices computed over one grid. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    pub lattice: Lattice,
    pub indices: BTreeMap<String, IndexGrid>,
    pub metadata: ResultMetadata,
}

impl IndexResult {
    pub fn index(&self, name: &str) -> Option<&IndexGrid> {
        self.indices.get(&name.to_ascii_uppercase())
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    /// True when the result carries the partial-coverage flag for any reason.
    pub fn is_partial(&self) -> bool {
        self.metadata.partial_coverage || self.metadata.partial_fetch
    }

    /// Mark the result as built from an incomplete fetch.
    pub fn with_partial_fetch(mut self, partial: bool) -> Self {
        self.metadata.partial_fetch = partial;
        self
    }
}

/// Applies registry formulas cell by cell.
#[derive(Debug, Clone)]
pub struct IndexComputer {
    registry: Arc<IndexRegistry>,
}

impl Default for IndexComputer {
    fn default() -> Self {
        Self::new(Arc::new(IndexRegistry::with_defaults()))
    }
}

impl IndexComputer {
    pub fn new(registry: Arc<IndexRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// Compute `names` over `grid`.
    ///
    /// Fails before touching any cell if an index is unknown or the grid
    /// lacks one of its channels. Cells outside the region, or where any
    /// input is "no data", stay "no data".
    #[instrument(skip(self, grid), fields(cells = grid.lattice().len()))]
    pub fn compute<S: AsRef<str> + std::fmt::Debug>(
        &self,
        grid: &Grid,
        names: &[S],
    ) -> Result<IndexResult> {
        if names.is_empty() {
            return Err(ComputationError::EmptyIndexSet);
        }

        let mut selected: BTreeMap<String, &IndexDefinition> = BTreeMap::new();
        for name in names {
            let definition = self
                .registry
                .get(name.as_ref())
                .ok_or_else(|| ComputationError::UnknownIndex(name.as_ref().to_string()))?;
            for channel in &definition.channels {
                if !grid.has_channel(channel) {
                    return Err(ComputationError::MissingChannel {
                        index: definition.name.clone(),
                        channel: channel.clone(),
                    });
                }
            }
            selected.insert(definition.name.clone(), definition);
        }

        let mut indices = BTreeMap::new();
        let mut formula_versions = BTreeMap::new();
        let mut used_channels = BTreeMap::new();

        for (name, definition) in &selected {
            let inputs: Vec<_> = definition
                .channels
                .iter()
                .filter_map(|c| grid.channel(c))
                .collect();
            let mut scratch = Vec::with_capacity(inputs.len());
            let values = (0..grid.lattice().len())
                .map(|idx| {
                    if !grid.in_region(idx) {
                        return None;
                    }
                    scratch.clear();
                    for channel in &inputs {
                        scratch.push(channel.value(idx)?);
                    }
                    definition.evaluate(&scratch)
                })
                .collect();
            let grid_values = IndexGrid { values };
            debug!(index = %name, valid = grid_values.valid_count(), "Computed index");

            indices.insert(name.clone(), grid_values);
            formula_versions.insert(name.clone(), definition.version.clone());
            for channel in &definition.channels {
                if let Some(coverage) = grid.mean_coverage(channel) {
                    used_channels.insert(channel.clone(), coverage);
                }
            }
        }

        Ok(IndexResult {
            lattice: grid.lattice().clone(),
            indices,
            metadata: ResultMetadata {
                formula_versions,
                provenance: grid.provenance().to_vec(),
                partial_coverage: grid.partial_coverage(),
                partial_fetch: false,
                channel_coverage: used_channels,
            },
        })
    }
}
