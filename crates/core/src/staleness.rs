//! Freshness of stored entries
//!
//! An entry is fresh when none of the stages it depends on has been
//! recomputed since it was saved, and every overlay key it tracks still has
//! the value it had at save time.

use crate::config::ConfigOverlay;
use crate::stage::Stage;
use stagecache_cache::{CacheKeyable, EntryMetadata, Freshness, UNSET_CONFIG_VALUE};
use std::collections::BTreeMap;

/// Canonical value of each tracked overlay key, as recorded in metadata.
#[must_use]
pub fn config_snapshot(stage: &Stage, overlay: &ConfigOverlay) -> BTreeMap<String, String> {
    stage
        .config_dependencies()
        .iter()
        .map(|key| (key.clone(), config_value(overlay, key)))
        .collect()
}

fn config_value(overlay: &ConfigOverlay, key: &str) -> String {
    overlay
        .get(key)
        .map_or_else(|| UNSET_CONFIG_VALUE.to_string(), |v| v.canonical())
}

/// Decide whether `metadata` may still be served for `stage`.
///
/// `current_version` returns the present `last_modified` of a dependency
/// stage (`0.0` when it was never computed).
pub fn check<F>(
    stage: &Stage,
    metadata: &EntryMetadata,
    overlay: &ConfigOverlay,
    current_version: F,
) -> Freshness
where
    F: Fn(&str) -> f64,
{
    for dep in stage.dependencies() {
        let Some(&recorded) = metadata.dependencies.get(dep) else {
            return Freshness::stale(format!("no recorded version for dependency '{dep}'"));
        };
        let current = current_version(dep);
        if current > recorded {
            return Freshness::stale(format!(
                "dependency '{dep}' changed ({current} > {recorded})"
            ));
        }
    }

    for key in stage.config_dependencies() {
        let current = config_value(overlay, key);
        match metadata.config_values.get(key) {
            None => {
                return Freshness::stale(format!("no recorded value for config '{key}'"));
            }
            Some(recorded) if *recorded != current => {
                return Freshness::stale(format!(
                    "config '{key}' changed ({recorded} -> {current})"
                ));
            }
            Some(_) => {}
        }
    }

    Freshness::Fresh
}
