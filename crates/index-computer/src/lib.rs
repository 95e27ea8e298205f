//! Air-quality indices over normalized grids.
//!
//! Each index is a pure function of one or more channels in a cell, looked
//! up by name in an [`IndexRegistry`]. "No data" in, "no data" out.

pub mod aqi;
pub mod compute;
pub mod error;
pub mod registry;

pub use aqi::{aqi_from_breakpoints, AqiCategory, Breakpoint};
pub use compute::{IndexComputer, IndexGrid, IndexResult, ResultMetadata};
pub use error::{ComputationError, Result};
pub use registry::{IndexDefinition, IndexFn, IndexInfo, IndexRegistry};
