//! Named index formulas and the channels they read.
//!
//! The registry is an ordinary value handed to the [`IndexComputer`]; there
//! is no process-wide table, so tests can run with their own index sets.
//!
//! [`IndexComputer`]: crate::IndexComputer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::aqi::{
    aqi_from_breakpoints, hcho_column_to_ppb, no2_column_to_ppb, AqiCategory, HCHO_BREAKPOINTS,
    NO2_BREAKPOINTS, O3_BREAKPOINTS,
};
use crate::error::{ComputationError, Result};

/// Pure per-cell formula. Inputs arrive in the order of the definition's
/// `channels`; returning `None` marks the cell as "no data".
pub type IndexFn = Arc<dyn Fn(&[f64]) -> Option<f64> + Send + Sync>;

/// One registered index.
#[derive(Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub description: String,
    pub channels: Vec<String>,
    pub version: String,
    pub func: IndexFn,
}

impl IndexDefinition {
    pub fn new<F>(name: &str, description: &str, channels: &[&str], version: &str, func: F) -> Self
    where
        F: Fn(&[f64]) -> Option<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.to_ascii_uppercase(),
            description: description.to_string(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            version: version.to_string(),
            func: Arc::new(func),
        }
    }

    /// Evaluate the formula, discarding non-finite outputs.
    pub fn evaluate(&self, inputs: &[f64]) -> Option<f64> {
        (self.func)(inputs).filter(|v| v.is_finite())
    }

    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            channels: self.channels.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Debug for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Public description of an index, as listed to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub description: String,
    pub channels: Vec<String>,
    pub version: String,
}

/// Index definitions keyed by upper-cased name.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    indices: BTreeMap<String, IndexDefinition>,
}

impl IndexRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in TEMPO air-quality indices.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for definition in default_definitions() {
            registry.indices.insert(definition.name.clone(), definition);
        }
        registry
    }

    /// Add an index. Names are case-insensitive and must be unique.
    pub fn register(&mut self, definition: IndexDefinition) -> Result<()> {
        let key = definition.name.to_ascii_uppercase();
        if self.indices.contains_key(&key) {
            return Err(ComputationError::DuplicateIndex(key));
        }
        self.indices.insert(key, definition);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, definition: IndexDefinition) -> Result<Self> {
        self.register(definition)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&IndexDefinition> {
        self.indices.get(&name.to_ascii_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// All indices, sorted by name.
    pub fn list(&self) -> Vec<IndexInfo> {
        self.indices.values().map(IndexDefinition::info).collect()
    }

    /// Sorted, deduplicated channels needed by `names`.
    pub fn required_channels<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        let mut channels = Vec::new();
        for name in names {
            let definition = self
                .get(name.as_ref())
                .ok_or_else(|| ComputationError::UnknownIndex(name.as_ref().to_string()))?;
            channels.extend(definition.channels.iter().cloned());
        }
        channels.sort();
        channels.dedup();
        Ok(channels)
    }
}

const AQI_VERSION: &str = "epa-breakpoints/1";

fn no2_aqi(column: f64) -> Option<f64> {
    aqi_from_breakpoints(no2_column_to_ppb(column), NO2_BREAKPOINTS)
}

fn o3_aqi(ppb: f64) -> Option<f64> {
    aqi_from_breakpoints(ppb, O3_BREAKPOINTS)
}

fn hcho_aqi(column: f64) -> Option<f64> {
    aqi_from_breakpoints(hcho_column_to_ppb(column), HCHO_BREAKPOINTS)
}

/// Dominant-pollutant AQI. Every pollutant must have a value.
fn combined_aqi(inputs: &[f64]) -> Option<f64> {
    match inputs {
        [hcho, no2, o3] => {
            let values = [hcho_aqi(*hcho)?, no2_aqi(*no2)?, o3_aqi(*o3)?];
            values.into_iter().reduce(f64::max)
        }
        _ => None,
    }
}

fn default_definitions() -> Vec<IndexDefinition> {
    vec![
        IndexDefinition::new(
            "NO2_PPB",
            "Approximate surface NO2 (ppb) from the tropospheric column",
            &["NO2"],
            "column-scale/1",
            |v| v.first().map(|c| no2_column_to_ppb(*c)),
        ),
        IndexDefinition::new(
            "HCHO_PPB",
            "Approximate HCHO (ppb) from the vertical column",
            &["HCHO"],
            "column-scale/1",
            |v| v.first().map(|c| hcho_column_to_ppb(*c)),
        ),
        IndexDefinition::new(
            "NO2_AQI",
            "EPA AQI for nitrogen dioxide",
            &["NO2"],
            AQI_VERSION,
            |v| v.first().and_then(|c| no2_aqi(*c)),
        ),
        IndexDefinition::new(
            "O3_AQI",
            "EPA AQI for ozone",
            &["O3"],
            AQI_VERSION,
            |v| v.first().and_then(|c| o3_aqi(*c)),
        ),
        IndexDefinition::new(
            "HCHO_AQI",
            "Health-based AQI approximation for formaldehyde",
            &["HCHO"],
            AQI_VERSION,
            |v| v.first().and_then(|c| hcho_aqi(*c)),
        ),
        IndexDefinition::new(
            "AQI",
            "Combined AQI: maximum of the NO2, O3 and HCHO indices",
            &["HCHO", "NO2", "O3"],
            AQI_VERSION,
            combined_aqi,
        ),
        IndexDefinition::new(
            "AQI_CATEGORY",
            "AQI category, 0 (Good) to 5 (Hazardous)",
            &["HCHO", "NO2", "O3"],
            AQI_VERSION,
            |v| {
                combined_aqi(v)
                    .and_then(AqiCategory::from_aqi)
                    .map(|c| f64::from(c.number()))
            },
        ),
    ]
}
