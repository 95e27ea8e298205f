//! Reconciles heterogeneous granules onto one spatiotemporal lattice.
//!
//! Every cell carries a reduced value (or "no data") and the fraction of
//! its area and time that was actually observed. Cells observed too little
//! are left empty rather than filled in.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod grid;
pub mod lattice;
pub mod normalizer;
pub mod reducer;

pub use accumulator::GridAccumulator;
pub use config::NormalizerConfig;
pub use error::{NormalizationError, Result};
pub use grid::{Cell, ChannelGrid, Grid};
pub use lattice::Lattice;
pub use normalizer::{normalize, GridNormalizer};
pub use reducer::{Reducer, ReducerKind, Sample};
