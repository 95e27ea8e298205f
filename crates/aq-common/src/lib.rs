//! Common types shared by every stage of the air-quality pipeline.
//!
//! The data model flows leaf-first through the workspace:
//!
//! ```text
//! Region + TimeWindow ──► granule-fetcher ──► Granule ──► grid-normalizer
//!        │                                                    │
//!        └──────────► CacheKey ◄── aggregation-cache ◄── index-computer
//! ```

pub mod bbox;
pub mod crs;
pub mod error;
pub mod granule;
pub mod key;
pub mod region;
pub mod time;

pub use bbox::BoundingBox;
pub use crs::{CrsCode, CrsParseError};
pub use error::{ErrorKind, RequestError, RequestResult};
pub use granule::{Granule, GranuleShapeError, Provenance};
pub use key::CacheKey;
pub use region::{Geometry, Region, RegionError};
pub use time::{TimeParseError, TimeWindow, TimeWindowError};
