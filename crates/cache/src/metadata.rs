//! Metadata sidecar written next to every result artifact

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value recorded in `config_values` for a tracked key the overlay lacks.
pub const UNSET_CONFIG_VALUE: &str = "<unset>";

/// Metadata about one cache entry.
///
/// Stored as pretty-printed JSON so entries can be audited without decoding
/// the (possibly large) result artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Name of the stage that produced the entry
    pub function: String,
    /// Cache key of the entry
    pub key: String,
    /// Effective arguments the stage ran with; dependency parameters that
    /// were resolved automatically appear as their marker string
    pub args: BTreeMap<String, serde_json::Value>,
    /// Seconds since the Unix epoch when the entry was saved
    pub timestamp: f64,
    /// Human-readable form of `timestamp`
    pub created_at: DateTime<Utc>,
    /// Seconds spent running the stage function
    pub time_taken: f64,
    /// `last_modified` of each dependency stage at save time
    #[serde(default)]
    pub dependencies: BTreeMap<String, f64>,
    /// Canonical value of each tracked overlay key at save time
    #[serde(default)]
    pub config_values: BTreeMap<String, String>,
}

/// Current time as fractional seconds since the Unix epoch.
#[must_use]
pub fn now_timestamp() -> f64 {
    timestamp_of(Utc::now())
}

/// Convert a UTC instant to fractional epoch seconds (microsecond resolution).
#[must_use]
pub fn timestamp_of(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}
