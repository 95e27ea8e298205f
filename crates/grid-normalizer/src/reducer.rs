//! Reducers combining the samples that land in one lattice cell.
//!
//! Samples reach a reducer in canonical order (granule id, pixel index), so
//! a reducer only has to be deterministic for a given slice to make the
//! whole normalization independent of granule arrival order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

/// One granule pixel's contribution to a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: f64,
    /// Spatial overlap fraction times temporal overlap fraction.
    pub weight: f64,
    /// Granule mid-time, milliseconds since the window start.
    pub time_ms: i64,
    pub granule_id: Arc<str>,
    pub pixel: usize,
}

impl Sample {
    /// Total order used to canonicalize sample lists.
    pub fn canonical_cmp(&self, other: &Sample) -> Ordering {
        self.granule_id
            .cmp(&other.granule_id)
            .then(self.pixel.cmp(&other.pixel))
            .then(self.value.total_cmp(&other.value))
            .then(self.weight.total_cmp(&other.weight))
            .then(self.time_ms.cmp(&other.time_ms))
    }
}

/// Capability for reducing a cell's samples to one value.
pub trait Reducer: Send + Sync {
    fn name(&self) -> &str;

    /// Reduce canonically ordered `samples`. `target_ms` is the bucket
    /// mid-time. Returns `None` when the samples carry no usable weight.
    fn reduce(&self, samples: &[Sample], target_ms: i64) -> Option<f64>;
}

/// Built-in reducers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReducerKind {
    /// Weighted arithmetic mean.
    #[default]
    Mean,
    /// Weighted median (lower median on ties).
    Median,
    /// Samples from the granule closest in time to the bucket centre,
    /// averaged by weight.
    NearestInTime,
}

impl ReducerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReducerKind::Mean => "mean",
            ReducerKind::Median => "median",
            ReducerKind::NearestInTime => "nearest_in_time",
        }
    }

    pub fn into_reducer(self) -> Arc<dyn Reducer> {
        Arc::new(self)
    }
}

impl FromStr for ReducerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "mean" => Ok(ReducerKind::Mean),
            "median" => Ok(ReducerKind::Median),
            "nearest_in_time" | "nearest" => Ok(ReducerKind::NearestInTime),
            other => Err(format!("unknown reducer: {}", other)),
        }
    }
}

impl Reducer for ReducerKind {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn reduce(&self, samples: &[Sample], target_ms: i64) -> Option<f64> {
        match self {
            ReducerKind::Mean => weighted_mean(samples),
            ReducerKind::Median => weighted_median(samples),
            ReducerKind::NearestInTime => nearest_in_time(samples, target_ms),
        }
    }
}

fn weighted_mean(samples: &[Sample]) -> Option<f64> {
    let mut total_weight = 0.0;
    let mut sum = 0.0;
    for s in samples.iter().filter(|s| s.weight > 0.0) {
        total_weight += s.weight;
        sum += s.weight * s.value;
    }
    if total_weight > 0.0 {
        Some(sum / total_weight)
    } else {
        None
    }
}

fn weighted_median(samples: &[Sample]) -> Option<f64> {
    let mut ordered: Vec<&Sample> = samples.iter().filter(|s| s.weight > 0.0).collect();
    if ordered.is_empty() {
        return None;
    }
    // Stable sort keeps the canonical order among equal values.
    ordered.sort_by(|a, b| a.value.total_cmp(&b.value));

    let total: f64 = ordered.iter().map(|s| s.weight).sum();
    let half = total / 2.0;
    let mut cumulative = 0.0;
    for s in &ordered {
        cumulative += s.weight;
        if cumulative >= half {
            return Some(s.value);
        }
    }
    ordered.last().map(|s| s.value)
}

fn nearest_in_time(samples: &[Sample], target_ms: i64) -> Option<f64> {
    let best = samples
        .iter()
        .filter(|s| s.weight > 0.0)
        .map(|s| ((s.time_ms - target_ms).abs(), &s.granule_id))
        .min()?;
    let (distance, granule) = (best.0, best.1.clone());

    let chosen: Vec<Sample> = samples
        .iter()
        .filter(|s| {
            s.weight > 0.0 && (s.time_ms - target_ms).abs() == distance && s.granule_id == granule
        })
        .cloned()
        .collect();
    weighted_mean(&chosen)
}
