//! Content-addressed cache keys.
//!
//! The key is a SHA-256 digest of a versioned canonical string, so it is
//! stable across process restarts and can back a durable cache.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Region, TimeWindow};

/// Bumped whenever the canonical string layout changes.
const KEY_VERSION: &str = "aq-key/v1";

/// Hex-encoded SHA-256 of a request's canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for (region, window, index set, lattice resolution).
    ///
    /// Index names are upper-cased, sorted and deduplicated, so the order
    /// and casing the caller used do not matter.
    pub fn derive(
        region: &Region,
        window: &TimeWindow,
        indices: &[impl AsRef<str>],
        resolution: f64,
        bucket_secs: i64,
    ) -> Self {
        let canonical = canonical_request(region, window, indices, resolution, bucket_secs);
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        CacheKey(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The exact text that gets hashed.
pub fn canonical_request(
    region: &Region,
    window: &TimeWindow,
    indices: &[impl AsRef<str>],
    resolution: f64,
    bucket_secs: i64,
) -> String {
    let mut names: Vec<String> = indices
        .iter()
        .map(|n| n.as_ref().trim().to_uppercase())
        .collect();
    names.sort();
    names.dedup();

    format!(
        "{}|{}|{}|{}|{}|res={:.6}|bucket={}",
        KEY_VERSION,
        region.canonical_string(),
        window.start().to_rfc3339(),
        window.end().to_rfc3339(),
        names.join(","),
        resolution,
        bucket_secs
    )
}
