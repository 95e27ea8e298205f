//! Incremental construction of a [`Grid`].
//!
//! Granules are pushed one at a time as the fetcher yields them. Each valid
//! pixel contributes a weighted [`Sample`] to every cell and time bucket it
//! overlaps, and marks the coverage sub-points it contains as observed for
//! its time span. Nothing is reduced until [`GridAccumulator::finish`],
//! which sorts samples canonically first, so the result does not depend on
//! push order.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use aq_common::{CrsCode, Granule, Provenance, Region, TimeWindow};

use crate::config::NormalizerConfig;
use crate::error::{NormalizationError, Result};
use crate::grid::{Cell, ChannelGrid, Grid};
use crate::lattice::Lattice;
use crate::reducer::{Reducer, Sample};

struct ChannelAccumulator {
    /// Per flat cell index.
    samples: Vec<Vec<Sample>>,
    /// Observed `[start, end)` intervals (ms since window start) per
    /// coverage sub-point, `spatial * k * k + b * k + a`.
    observed: Vec<Vec<(i64, i64)>>,
}

impl ChannelAccumulator {
    fn new(cells: usize, sub_points: usize) -> Self {
        Self {
            samples: vec![Vec::new(); cells],
            observed: vec![Vec::new(); sub_points],
        }
    }
}

/// Accumulates granules onto a lattice.
pub struct GridAccumulator {
    lattice: Lattice,
    in_region: Vec<bool>,
    config: NormalizerConfig,
    reducer: Arc<dyn Reducer>,
    channels: BTreeMap<String, ChannelAccumulator>,
    provenance: Vec<Provenance>,
}

impl GridAccumulator {
    /// Prepare the lattice for `region` and `window`.
    pub fn new(region: &Region, window: &TimeWindow, config: NormalizerConfig) -> Result<Self> {
        let lattice = Lattice::for_region(region, window, &config)?;
        let in_region = if region.is_rectangular() {
            vec![true; lattice.spatial_len()]
        } else {
            let mut mask = Vec::with_capacity(lattice.spatial_len());
            for j in 0..lattice.ny() {
                for i in 0..lattice.nx() {
                    let (x, y) = lattice.cell_center(i, j);
                    mask.push(region.contains_point(x, y));
                }
            }
            mask
        };
        let reducer = config.reducer.into_reducer();
        Ok(Self {
            lattice,
            in_region,
            config,
            reducer,
            channels: BTreeMap::new(),
            provenance: Vec::new(),
        })
    }

    /// Replace the configured reducer.
    pub fn with_reducer(mut self, reducer: Arc<dyn Reducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Granules pushed so far.
    pub fn granule_count(&self) -> usize {
        self.provenance.len()
    }

    /// Add one granule.
    pub fn push(&mut self, granule: &Granule) -> Result<()> {
        let granule_id = granule.provenance.granule_id.as_str();
        let malformed = |reason: String| NormalizationError::MalformedGranule {
            granule_id: granule_id.to_string(),
            reason,
        };

        granule
            .validate_shape()
            .map_err(|e| malformed(e.to_string()))?;
        if !granule.footprint.is_finite()
            || !(granule.footprint.width() > 0.0)
            || !(granule.footprint.height() > 0.0)
        {
            return Err(malformed(format!("degenerate footprint {:?}", granule.footprint)));
        }

        let source_crs =
            CrsCode::parse(&granule.crs).map_err(|_| NormalizationError::UnparseableCrs {
                granule_id: granule_id.to_string(),
                crs: granule.crs.clone(),
            })?;
        let target_crs = self.lattice.crs();
        let incompatible = || NormalizationError::IncompatibleCrs {
            granule_id: granule_id.to_string(),
            from: source_crs.to_string(),
            to: target_crs.to_string(),
        };
        if !source_crs.can_reproject_to(target_crs) {
            return Err(incompatible());
        }

        self.provenance.push(granule.provenance.clone());

        let start = self.lattice.offset_ms(granule.coverage.start()).max(0);
        let end = self
            .lattice
            .offset_ms(granule.coverage.end())
            .min(self.lattice.window_ms());
        if start >= end {
            debug!(granule_id, "Granule outside the time window");
            return Ok(());
        }
        let mid = self.lattice.offset_ms(granule.coverage.midpoint());

        let (bucket_first, bucket_last) = {
            let (_, first_end) = self.lattice.bucket_ms(0);
            let bucket = first_end.max(1);
            ((start / bucket) as usize, ((end - 1) / bucket) as usize)
        };
        let bucket_last = bucket_last.min(self.lattice.nt() - 1);

        let k = self.config.coverage_samples;
        let k2 = k * k;
        let nx = self.lattice.nx();
        let shared_id: Arc<str> = Arc::from(granule_id);
        let lattice = &self.lattice;
        let in_region = &self.in_region;
        let acc = self
            .channels
            .entry(granule.channel.clone())
            .or_insert_with(|| ChannelAccumulator::new(lattice.len(), lattice.spatial_len() * k2));

        for row in 0..granule.height {
            for col in 0..granule.width {
                let Some(value) = granule.sample(col, row) else {
                    continue;
                };
                let pixel = source_crs
                    .reproject_bbox(target_crs, &granule.pixel_bbox(col, row))
                    .ok_or_else(incompatible)?;
                let Some((i0, i1)) = lattice.columns(pixel.min_x, pixel.max_x) else {
                    continue;
                };
                let Some((j0, j1)) = lattice.rows(pixel.min_y, pixel.max_y) else {
                    continue;
                };

                for j in j0..=j1 {
                    for i in i0..=i1 {
                        let spatial = j * nx + i;
                        if !in_region[spatial] {
                            continue;
                        }
                        let cell = lattice.cell_bbox(i, j);
                        let Some(overlap) = cell.intersection(&pixel) else {
                            continue;
                        };
                        let spatial_fraction = overlap.area() / cell.area();

                        for b in 0..k {
                            let sy = cell.min_y + (b as f64 + 0.5) / k as f64 * cell.height();
                            if sy < pixel.min_y || sy >= pixel.max_y {
                                continue;
                            }
                            for a in 0..k {
                                let sx = cell.min_x + (a as f64 + 0.5) / k as f64 * cell.width();
                                if sx >= pixel.min_x && sx < pixel.max_x {
                                    acc.observed[spatial * k2 + b * k + a].push((start, end));
                                }
                            }
                        }

                        for t in bucket_first..=bucket_last {
                            let (b0, b1) = lattice.bucket_ms(t);
                            let overlap_ms = end.min(b1) - start.max(b0);
                            if overlap_ms <= 0 {
                                continue;
                            }
                            let temporal_fraction = overlap_ms as f64 / (b1 - b0) as f64;
                            acc.samples[lattice.index(i, j, t)].push(Sample {
                                value: value as f64,
                                weight: spatial_fraction * temporal_fraction,
                                time_ms: mid,
                                granule_id: shared_id.clone(),
                                pixel: row * granule.width + col,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Reduce everything pushed so far into a [`Grid`].
    pub fn finish(self) -> Result<Grid> {
        if self.provenance.is_empty() {
            return Err(NormalizationError::NoGranules);
        }

        let lattice = self.lattice;
        let k2 = self.config.coverage_samples * self.config.coverage_samples;
        let nxy = lattice.spatial_len();
        let mut channels = BTreeMap::new();

        for (name, mut acc) in self.channels {
            let mut cells = vec![Cell::NO_DATA; lattice.len()];
            for t in 0..lattice.nt() {
                let (b0, b1) = lattice.bucket_ms(t);
                let target = b0 + (b1 - b0) / 2;
                let full = k2 as i64 * (b1 - b0);
                for spatial in 0..nxy {
                    if !self.in_region[spatial] {
                        continue;
                    }
                    let observed: i64 = acc.observed[spatial * k2..(spatial + 1) * k2]
                        .iter()
                        .map(|intervals| union_length(intervals, b0, b1))
                        .sum();
                    let coverage = observed as f64 / full as f64;

                    let idx = t * nxy + spatial;
                    let samples = &mut acc.samples[idx];
                    samples.sort_by(Sample::canonical_cmp);
                    let value = if self.config.keeps(coverage) {
                        self.reducer
                            .reduce(samples, target)
                            .filter(|v| v.is_finite())
                    } else {
                        None
                    };
                    cells[idx] = Cell { value, coverage };
                }
            }
            channels.insert(name, ChannelGrid::new(cells));
        }

        debug!(
            channels = channels.len(),
            granules = self.provenance.len(),
            cells = lattice.len(),
            reducer = self.reducer.name(),
            "Grid normalized"
        );
        Grid::new(lattice, channels, self.in_region, self.provenance)
    }
}

/// Length of the union of `intervals` clipped to `[lo, hi)`.
fn union_length(intervals: &[(i64, i64)], lo: i64, hi: i64) -> i64 {
    let mut clipped: Vec<(i64, i64)> = intervals
        .iter()
        .map(|&(s, e)| (s.max(lo), e.min(hi)))
        .filter(|(s, e)| s < e)
        .collect();
    if clipped.is_empty() {
        return 0;
    }
    clipped.sort_unstable();

    let mut total = 0;
    let (mut cur_start, mut cur_end) = clipped[0];
    for &(s, e) in &clipped[1..] {
        if s > cur_end {
            total += cur_end - cur_start;
            cur_start = s;
            cur_end = e;
        } else {
            cur_end = cur_end.max(e);
        }
    }
    total + (cur_end - cur_start)
}
