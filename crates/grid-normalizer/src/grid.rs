//! The normalized, immutable grid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use aq_common::Provenance;

use crate::error::{NormalizationError, Result};
use crate::lattice::Lattice;

/// One lattice cell of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Reduced measurement, `None` for "no data".
    pub value: Option<f64>,
    /// Fraction of the cell's area and time actually observed, in `[0, 1]`.
    pub coverage: f64,
}

impl Cell {
    pub const NO_DATA: Cell = Cell {
        value: None,
        coverage: 0.0,
    };

    pub fn is_no_data(&self) -> bool {
        self.value.is_none()
    }
}

/// Cells of one measurement channel, indexed like [`Lattice::index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGrid {
    cells: Vec<Cell>,
}

impl ChannelGrid {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn value(&self, index: usize) -> Option<f64> {
        self.cells.get(index).and_then(|c| c.value)
    }

    /// Cells holding a value.
    pub fn valid_count(&self) -> usize {
        self.cells.iter().filter(|c| c.value.is_some()).count()
    }
}

/// Measurements reconciled onto one lattice. Built once; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    lattice: Lattice,
    channels: BTreeMap<String, ChannelGrid>,
    /// Per spatial cell: whether its centre lies inside the region.
    in_region: Vec<bool>,
    /// Input granules, sorted by granule id.
    provenance: Vec<Provenance>,
}

impl Grid {
    /// Assemble a grid, checking every array against the lattice shape.
    pub fn new(
        lattice: Lattice,
        channels: BTreeMap<String, ChannelGrid>,
        in_region: Vec<bool>,
        mut provenance: Vec<Provenance>,
    ) -> Result<Self> {
        if in_region.len() != lattice.spatial_len() {
            return Err(NormalizationError::InvalidLattice(format!(
                "region mask has {} cells, lattice has {}",
                in_region.len(),
                lattice.spatial_len()
            )));
        }
        for (name, channel) in &channels {
            if channel.cells.len() != lattice.len() {
                return Err(NormalizationError::InvalidLattice(format!(
                    "channel {} has {} cells, lattice has {}",
                    name,
                    channel.cells.len(),
                    lattice.len()
                )));
            }
        }
        provenance.sort_by(|a, b| {
            a.granule_id
                .cmp(&b.granule_id)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then(a.fetched_at.cmp(&b.fetched_at))
        });
        Ok(Self {
            lattice,
            channels,
            in_region,
            provenance,
        })
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelGrid> {
        self.channels.get(name)
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Channel names in sorted order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn channels(&self) -> &BTreeMap<String, ChannelGrid> {
        &self.channels
    }

    pub fn provenance(&self) -> &[Provenance] {
        &self.provenance
    }

    /// Whether the flat cell `index` lies inside the region.
    pub fn in_region(&self, index: usize) -> bool {
        let spatial = index % self.lattice.spatial_len();
        self.in_region.get(spatial).copied().unwrap_or(false)
    }

    pub fn region_mask(&self) -> &[bool] {
        &self.in_region
    }

    /// True when any in-region cell of any channel was not fully observed.
    pub fn partial_coverage(&self) -> bool {
        self.channels.values().any(|channel| {
            channel
                .cells
                .iter()
                .enumerate()
                .any(|(idx, cell)| self.in_region(idx) && cell.coverage < 1.0)
        })
    }

    /// Mean coverage over in-region cells of `channel`.
    pub fn mean_coverage(&self, channel: &str) -> Option<f64> {
        let grid = self.channels.get(channel)?;
        let (sum, n) = grid
            .cells
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.in_region(*idx))
            .fold((0.0, 0usize), |(sum, n), (_, c)| (sum + c.coverage, n + 1));
        if n == 0 {
            None
        } else {
            Some(sum / n as f64)
        }
    }
}
