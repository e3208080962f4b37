//! Shared primitive types used across the pipeline.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A simulation tick. One tick = one simulated match minute.
pub type Tick = u32;

/// Stable roster identifier of one athlete, 1..=N.
pub type EntityId = u32;

/// Last tick of a regulation match. Ticks run 0..=FULL_TIME inclusive.
pub const FULL_TIME: Tick = 90;

/// Identifier of one simulation run.
///
/// Always a zero-padded calendar timestamp (`YYYYMMDD_HHMMSS`), optionally
/// followed by a zero-padded `_NN` disambiguator. Lexicographic order of
/// the string is creation order; the run selector relies on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub const FORMAT: &'static str = "%Y%m%d_%H%M%S";

    pub fn from_start_time(started_at: &DateTime<FixedOffset>) -> Self {
        Self(started_at.format(Self::FORMAT).to_string())
    }

    /// The same run id with a collision suffix, e.g. `20240101_090000_01`.
    pub fn with_suffix(&self, n: u8) -> Self {
        Self(format!("{}_{n:02}", self.0))
    }

    /// Wrap an existing identifier, e.g. one recovered from a collection name.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
