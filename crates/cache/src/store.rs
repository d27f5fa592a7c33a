//! On-disk entry storage with an in-process hot layer
//!
//! ## Directory Structure
//!
//! ```text
//! {root}/
//!   {stage}/
//!     .last_modified           (stage version, JSON)
//!     {stage}_{key}.json       (entry metadata)
//!     {stage}_{key}.bin        (result envelope)
//! ```
//!
//! Each artifact is written to a temporary file in the same directory and
//! renamed into place, so a reader never observes a torn artifact. There is
//! no cross-process locking: two processes recomputing the same key race
//! and the last rename wins.

use crate::envelope;
use crate::key::CacheKey;
use crate::metadata::{EntryMetadata, now_timestamp};
use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const METADATA_EXT: &str = "json";
const RESULT_EXT: &str = "bin";
const VERSION_FILE: &str = ".last_modified";

/// Smallest step between two successive versions of one stage.
const VERSION_EPSILON: f64 = 1e-6;

/// Locations of the two artifacts of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    /// Human-readable metadata sidecar
    pub metadata: PathBuf,
    /// Opaque result envelope
    pub result: PathBuf,
}

/// Outcome of a staleness check on loaded metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The entry may be used
    Fresh,
    /// The entry must be recomputed
    Stale {
        /// Why the entry was rejected
        reason: String,
    },
}

impl Freshness {
    /// Create a stale outcome
    #[must_use]
    pub fn stale(reason: impl Into<String>) -> Self {
        Self::Stale {
            reason: reason.into(),
        }
    }
}

/// Summary of one on-disk entry, for inspection tooling.
#[derive(Debug, Clone)]
pub struct EntrySummary {
    /// Cache key parsed from the file name
    pub key: String,
    /// Parsed metadata, or the reason it could not be read
    pub metadata: std::result::Result<EntryMetadata, String>,
    /// Whether the result artifact exists
    pub has_result: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct StageVersion {
    last_modified: f64,
}

#[derive(Debug, Clone)]
struct HotEntry {
    metadata: EntryMetadata,
    result: Value,
}

/// Validate that a stage name is usable as a directory name.
///
/// # Errors
///
/// Returns an error if the name is empty, starts with a dot, or contains
/// characters other than ASCII alphanumerics, `-`, `_` and `.`.
pub fn validate_stage_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::configuration("stage name must not be empty"));
    }
    if name.starts_with('.') {
        return Err(Error::configuration(format!(
            "stage name '{name}' must not start with '.'"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::configuration(format!(
            "stage name '{name}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Durable entry storage rooted at one directory.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    hot: Mutex<HashMap<(String, CacheKey), HotEntry>>,
    versions: Mutex<HashMap<String, f64>>,
}

impl CacheStore {
    /// Create a store rooted at `root`. Nothing is created on disk until the
    /// first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hot: Mutex::new(HashMap::new()),
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stage_dir(&self, stage: &str) -> Result<PathBuf> {
        validate_stage_name(stage)?;
        Ok(self.root.join(stage))
    }

    /// Deterministic artifact locations for an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage name is invalid.
    pub fn paths_for(&self, stage: &str, key: &CacheKey) -> Result<EntryPaths> {
        let dir = self.stage_dir(stage)?;
        let base = format!("{stage}_{key}");
        Ok(EntryPaths {
            metadata: dir.join(format!("{base}.{METADATA_EXT}")),
            result: dir.join(format!("{base}.{RESULT_EXT}")),
        })
    }

    /// Load an entry if present, intact and fresh.
    ///
    /// `check` runs against the entry metadata before the result artifact is
    /// read, for hot and disk entries alike. Every failure is a miss: this
    /// never returns an error.
    pub fn load<F>(&self, stage: &str, key: &CacheKey, check: F) -> Option<Value>
    where
        F: FnOnce(&EntryMetadata) -> Freshness,
    {
        let hot_key = (stage.to_string(), key.clone());
        let hot = self
            .hot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&hot_key)
            .cloned();
        if let Some(entry) = hot {
            return match check(&entry.metadata) {
                Freshness::Fresh => {
                    tracing::trace!(stage, %key, "Hot cache hit");
                    Some(entry.result)
                }
                Freshness::Stale { reason } => {
                    tracing::info!(stage, %key, %reason, "Cache entry stale");
                    self.evict(stage, key);
                    None
                }
            };
        }

        let paths = match self.paths_for(stage, key) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(stage, "Cannot locate cache entry: {e}");
                return None;
            }
        };
        let metadata = self.read_metadata_at(&paths.metadata, stage, key)?;

        if let Freshness::Stale { reason } = check(&metadata) {
            tracing::info!(stage, %key, %reason, "Cache entry stale");
            return None;
        }

        let started = std::time::Instant::now();
        let result = match fs::read(&paths.result)
            .map_err(|e| Error::io(e, &paths.result, "read"))
            .and_then(|bytes| envelope::decode(&bytes))
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(stage, %key, "Ignoring unreadable cache result: {e}");
                return None;
            }
        };
        tracing::info!(
            stage,
            %key,
            elapsed_ms = started.elapsed().as_millis(),
            "Loaded cache entry"
        );

        self.hot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                hot_key,
                HotEntry {
                    metadata,
                    result: result.clone(),
                },
            );
        Some(result)
    }

    fn read_metadata_at(&self, path: &Path, stage: &str, key: &CacheKey) -> Option<EntryMetadata> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(stage, %key, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(stage, %key, path = %path.display(), "Cannot read cache metadata: {e}");
                return None;
            }
        };
        let metadata: EntryMetadata = match serde_json::from_str(&content) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(stage, %key, path = %path.display(), "Ignoring corrupt cache metadata: {e}");
                return None;
            }
        };
        if metadata.function != stage || metadata.key != key.as_str() {
            tracing::warn!(
                stage,
                %key,
                recorded_stage = %metadata.function,
                recorded_key = %metadata.key,
                "Ignoring cache metadata recorded for another entry"
            );
            return None;
        }
        Some(metadata)
    }

    /// Persist an entry, replacing any previous artifacts for the same key.
    ///
    /// The result is written before the metadata so that metadata on disk
    /// always points at a complete result. The hot cache is updated only
    /// after both writes succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage directory cannot be created or either
    /// artifact cannot be serialized or written.
    pub fn save(
        &self,
        stage: &str,
        key: &CacheKey,
        result: &Value,
        metadata: &EntryMetadata,
    ) -> Result<()> {
        let paths = self.paths_for(stage, key)?;
        let started = std::time::Instant::now();

        let bytes = envelope::encode(result)?;
        write_atomic(&paths.result, &bytes)?;

        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| Error::serialization(format!("Failed to serialize metadata: {e}")))?;
        write_atomic(&paths.metadata, &json)?;

        tracing::info!(
            stage,
            %key,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Saved cache entry"
        );

        self.hot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (stage.to_string(), key.clone()),
                HotEntry {
                    metadata: metadata.clone(),
                    result: result.clone(),
                },
            );
        Ok(())
    }

    /// Drop an entry from the hot cache (disk is untouched).
    pub fn evict(&self, stage: &str, key: &CacheKey) {
        self.hot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(stage.to_string(), key.clone()));
    }

    /// Forget every hot entry and cached stage version.
    ///
    /// Subsequent loads read from disk as a fresh process would.
    pub fn clear_memory(&self) {
        self.hot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of entries held in the hot cache
    #[must_use]
    pub fn hot_len(&self) -> usize {
        self.hot.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Current version of a stage: when it was last freshly computed, or
    /// `0.0` if it never was.
    #[must_use]
    pub fn last_modified(&self, stage: &str) -> f64 {
        if let Some(v) = self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stage)
        {
            return *v;
        }
        let version = self.read_version(stage).unwrap_or(0.0);
        *self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage.to_string())
            .or_insert(version)
    }

    fn read_version(&self, stage: &str) -> Option<f64> {
        let path = self.stage_dir(stage).ok()?.join(VERSION_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(stage, "Cannot read stage version: {e}");
                return None;
            }
        };
        match serde_json::from_str::<StageVersion>(&content) {
            Ok(v) => Some(v.last_modified),
            Err(e) => {
                tracing::warn!(stage, "Ignoring corrupt stage version: {e}");
                None
            }
        }
    }

    /// Advance a stage's version after a fresh computation.
    ///
    /// Versions strictly increase even when the clock does not. The new
    /// version becomes visible only once it is on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the version file cannot be written.
    pub fn record_computed(&self, stage: &str) -> Result<f64> {
        let previous = self.last_modified(stage);
        let version = now_timestamp().max(previous + VERSION_EPSILON);

        let path = self.stage_dir(stage)?.join(VERSION_FILE);
        let json = serde_json::to_vec(&StageVersion {
            last_modified: version,
        })
        .map_err(|e| Error::serialization(format!("Failed to serialize stage version: {e}")))?;
        write_atomic(&path, &json)?;

        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stage.to_string(), version);
        tracing::debug!(stage, version, "Stage version advanced");
        Ok(version)
    }

    /// Store a freshly computed entry and advance the stage version.
    ///
    /// The version is persisted before the artifacts. A failure part way
    /// leaves at worst a newer version with no matching entry, which makes
    /// dependents recompute; it never serves an entry whose version was
    /// lost. Nothing reaches the hot cache unless every write succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the version or either artifact cannot be written.
    pub fn commit(
        &self,
        stage: &str,
        key: &CacheKey,
        result: &Value,
        metadata: &EntryMetadata,
    ) -> Result<f64> {
        let version = self.record_computed(stage)?;
        self.save(stage, key, result, metadata)?;
        Ok(version)
    }

    /// Names of all stages with a directory under the root, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists but cannot be listed.
    pub fn list_stages(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(e, &self.root, "read_dir")),
        };
        let mut stages: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| validate_stage_name(name).is_ok())
            .collect();
        stages.sort();
        Ok(stages)
    }

    /// Summaries of every entry of a stage, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage name is invalid or its directory exists
    /// but cannot be listed.
    pub fn list_entries(&self, stage: &str) -> Result<Vec<EntrySummary>> {
        let dir = self.stage_dir(stage)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(e, &dir, "read_dir")),
        };
        let prefix = format!("{stage}_");
        let suffix = format!(".{METADATA_EXT}");
        let mut summaries: Vec<EntrySummary> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| {
                let key = name.strip_prefix(&prefix)?.strip_suffix(&suffix)?;
                CacheKey::from_hex(key).ok()
            })
            .map(|key| {
                let metadata = self.read_metadata(stage, &key).map_err(|e| e.to_string());
                let has_result = self
                    .paths_for(stage, &key)
                    .map(|p| p.result.is_file())
                    .unwrap_or(false);
                EntrySummary {
                    key: key.to_string(),
                    metadata,
                    has_result,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    /// Read an entry's metadata without any freshness check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no metadata artifact, or an
    /// I/O / serialization error if it cannot be read.
    pub fn read_metadata(&self, stage: &str, key: &CacheKey) -> Result<EntryMetadata> {
        let paths = self.paths_for(stage, key)?;
        let content = match fs::read_to_string(&paths.metadata) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::not_found(stage, key.as_str()));
            }
            Err(e) => return Err(Error::io(e, &paths.metadata, "read")),
        };
        serde_json::from_str(&content)
            .map_err(|e| Error::serialization(format!("Failed to parse metadata: {e}")))
    }

    /// Read and verify an entry's result without any freshness check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no result artifact, or
    /// [`Error::Corrupt`] if it fails verification.
    pub fn read_result(&self, stage: &str, key: &CacheKey) -> Result<Value> {
        let paths = self.paths_for(stage, key)?;
        let bytes = match fs::read(&paths.result) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::not_found(stage, key.as_str()));
            }
            Err(e) => return Err(Error::io(e, &paths.result, "read")),
        };
        envelope::decode(&bytes)
    }

    /// Check both artifacts of an entry without any freshness check.
    ///
    /// # Errors
    ///
    /// Returns an error if either artifact is missing or unreadable, the
    /// metadata was recorded for another entry, or the result fails
    /// verification.
    pub fn verify_entry(&self, stage: &str, key: &CacheKey) -> Result<()> {
        let metadata = self.read_metadata(stage, key)?;
        if metadata.function != stage || metadata.key != key.as_str() {
            return Err(Error::corrupt(format!(
                "metadata was recorded for {}/{}",
                metadata.function, metadata.key
            )));
        }
        self.read_result(stage, key).map(|_| ())
    }
}

/// Write `data` to `path` through a temporary sibling and an atomic rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::configuration(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(e, parent, "create"))?;
    tmp.write_all(data)
        .map_err(|e| Error::io(e, tmp.path(), "write"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io(e, tmp.path(), "sync"))?;
    tmp.persist(path)
        .map_err(|e| Error::io(e.error, path, "rename"))?;
    Ok(())
}
