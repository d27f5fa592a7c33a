//! Stage orchestration
//!
//! A [`Pipeline`] owns the registered stages, the store and the overlay.
//! Every call goes through the same steps:
//!
//! 1. Reject arguments the stage cannot accept
//! 2. Merge defaults, caller arguments and overlay values
//! 3. Derive the key, with markers for unresolved dependency parameters
//! 4. Serve a fresh stored entry, or resolve dependencies, run the stage
//!    function, then commit the entry together with a new stage version

use crate::config::{ConfigOverlay, Settings};
use crate::resolver;
use crate::stage::{Args, Invocation, RESERVED_PARAM, Stage};
use crate::staleness;
use crate::{Error, Result};
use chrono::Utc;
use stagecache_cache::{
    CacheKey, CacheStore, EntryMetadata, KeyPart, Value, dependency_marker, derive_key,
    timestamp_of, validate_stage_name,
};
use stagecache_stage_graph::StageGraph;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

/// Collects stages and settings for a [`Pipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    cache_root: PathBuf,
    stages: Vec<Stage>,
    overlay: ConfigOverlay,
}

impl PipelineBuilder {
    /// Start a pipeline storing entries under `cache_root`.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            stages: Vec::new(),
            overlay: ConfigOverlay::new(),
        }
    }

    /// Start a pipeline from settings: the cache root they resolve to and
    /// their overlay (file values with environment overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if no cache root can be resolved or the overlay
    /// cannot be read.
    pub fn from_settings(settings: &Settings, explicit_root: Option<PathBuf>) -> Result<Self> {
        let cache_root = settings.cache_root(explicit_root)?;
        Ok(Self::new(cache_root).overlay(settings.overlay()?))
    }

    /// Register a stage.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replace the initial overlay.
    #[must_use]
    pub fn overlay(mut self, overlay: ConfigOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    /// Validate the stages and their dependency graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage name is invalid or taken twice, a stage
    /// declares the reserved parameter or ignores an undeclared one, a
    /// dependency is not registered, or the dependencies form a cycle.
    pub fn build(self) -> Result<Pipeline> {
        let mut graph = StageGraph::new();
        for stage in self.stages {
            validate_declaration(&stage)?;
            let name = stage.name().to_string();
            graph.add_stage(&name, stage)?;
        }
        graph.add_dependency_edges()?;
        graph.ensure_acyclic()?;

        tracing::info!(
            stages = graph.stage_count(),
            root = %self.cache_root.display(),
            "Pipeline ready"
        );
        Ok(Pipeline {
            store: CacheStore::new(self.cache_root),
            graph,
            overlay: RwLock::new(self.overlay),
        })
    }
}

fn validate_declaration(stage: &Stage) -> Result<()> {
    validate_stage_name(stage.name()).map_err(|e| Error::configuration(e.to_string()))?;
    if stage.recognizes(RESERVED_PARAM) {
        return Err(Error::configuration(format!(
            "stage '{}' declares reserved parameter '{RESERVED_PARAM}'",
            stage.name()
        )));
    }
    if let Some(name) = stage.ignored().iter().find(|n| !stage.recognizes(n)) {
        return Err(Error::configuration(format!(
            "stage '{}' ignores undeclared parameter '{name}'",
            stage.name()
        )));
    }
    Ok(())
}

/// Arguments of one call after merging, with the key they map to.
#[derive(Debug)]
struct PreparedCall {
    merged: Args,
    pending: BTreeMap<String, String>,
    key: CacheKey,
}

impl PreparedCall {
    /// Arguments as recorded in metadata; unresolved dependency parameters
    /// appear as their marker.
    fn metadata_args(&self) -> BTreeMap<String, serde_json::Value> {
        self.merged
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .chain(
                self.pending
                    .iter()
                    .map(|(name, dep)| (name.clone(), dependency_marker(dep).into())),
            )
            .collect()
    }
}

/// Registered stages bound to a store and an overlay.
pub struct Pipeline {
    store: CacheStore,
    graph: StageGraph<Stage>,
    overlay: RwLock<ConfigOverlay>,
}

impl Pipeline {
    /// Start building a pipeline storing entries under `cache_root`.
    #[must_use]
    pub fn builder(cache_root: impl Into<PathBuf>) -> PipelineBuilder {
        PipelineBuilder::new(cache_root)
    }

    /// The entry store.
    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Look up a registered stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStage`] if no stage has this name.
    pub fn stage(&self, name: &str) -> Result<&Stage> {
        self.graph
            .get_node_by_name(name)
            .map(|node| &node.stage)
            .ok_or_else(|| Error::unknown_stage(name))
    }

    /// Stage names, each after the stages it depends on.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be ordered.
    pub fn stage_order(&self) -> Result<Vec<String>> {
        Ok(self.graph.topological_sort()?)
    }

    /// Stages that read, directly or transitively, from `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        self.graph.transitive_dependents(name)
    }

    /// Copy of the current overlay.
    #[must_use]
    pub fn config(&self) -> ConfigOverlay {
        self.overlay
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set an overlay value; visible from the next call on.
    pub fn set_config(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.overlay
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(name, value)
    }

    /// Remove an overlay value.
    pub fn remove_config(&self, name: &str) -> Option<Value> {
        self.overlay
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Return the stored result for these arguments, computing it on a miss.
    ///
    /// A fresh entry is served without running the stage or any of its
    /// dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the call is invalid, the stage or a dependency
    /// fails, or the result cannot be saved.
    pub fn get_or_compute(&self, name: &str, args: Args) -> Result<Value> {
        let stage = self.stage(name)?;
        let overlay = self.config();
        let call = prepare(stage, args, &overlay)?;

        if let Some(result) = self.load(stage, &call.key, &overlay) {
            tracing::debug!(stage = name, key = %call.key, "Cache hit");
            return Ok(result);
        }
        self.compute(stage, &call, &overlay)
    }

    /// Make sure an entry exists for these arguments.
    ///
    /// Without `force`, returns `None` when a fresh entry already exists.
    /// Otherwise runs the stage and returns its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the call is invalid, the stage or a dependency
    /// fails, or the result cannot be saved.
    pub fn ensure_computed(&self, name: &str, args: Args, force: bool) -> Result<Option<Value>> {
        let stage = self.stage(name)?;
        let overlay = self.config();
        let call = prepare(stage, args, &overlay)?;

        if force {
            let dependents = self.graph.transitive_dependents(name);
            tracing::info!(
                stage = name,
                key = %call.key,
                ?dependents,
                "Forcing recompute"
            );
        } else if self.load(stage, &call.key, &overlay).is_some() {
            tracing::debug!(stage = name, key = %call.key, "Entry is current");
            return Ok(None);
        }
        self.compute(stage, &call, &overlay).map(Some)
    }

    fn load(&self, stage: &Stage, key: &CacheKey, overlay: &ConfigOverlay) -> Option<Value> {
        self.store.load(stage.name(), key, |metadata| {
            staleness::check(stage, metadata, overlay, |dep| {
                self.store.last_modified(dep)
            })
        })
    }

    fn compute(&self, stage: &Stage, call: &PreparedCall, overlay: &ConfigOverlay) -> Result<Value> {
        let name = stage.name();
        let args = resolver::resolve(self, &call.merged, &call.pending)?;

        // Read after resolution so freshly computed dependencies are recorded
        // at their new version.
        let dependencies: BTreeMap<String, f64> = stage
            .dependencies()
            .iter()
            .map(|dep| (dep.clone(), self.store.last_modified(dep)))
            .collect();

        tracing::debug!(stage = name, key = %call.key, "Running stage");
        let started = Instant::now();
        let result = stage
            .run(&Invocation::new(name, &args, overlay))
            .map_err(|source| {
                tracing::warn!(stage = name, key = %call.key, "Stage failed: {source}");
                Error::stage_computation(name, source)
            })?;
        let elapsed = started.elapsed();

        let now = Utc::now();
        let metadata = EntryMetadata {
            function: name.to_string(),
            key: call.key.to_string(),
            args: call.metadata_args(),
            timestamp: timestamp_of(now),
            created_at: now,
            time_taken: elapsed.as_secs_f64(),
            dependencies,
            config_values: staleness::config_snapshot(stage, overlay),
        };
        let version = self
            .store
            .commit(name, &call.key, &result, &metadata)
            .map_err(|e| Error::persistence(name, e))?;

        tracing::info!(
            stage = name,
            key = %call.key,
            elapsed_ms = elapsed.as_millis(),
            version,
            "Computed stage"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("root", &self.store.root())
            .field("stages", &self.graph.stage_count())
            .finish_non_exhaustive()
    }
}

fn validate_args(stage: &Stage, args: &Args) -> Result<()> {
    if args.contains_key(RESERVED_PARAM) {
        return Err(Error::invalid_usage(
            stage.name(),
            format!("'{RESERVED_PARAM}' is not an argument; use ensure_computed to force"),
        ));
    }
    let unknown: Vec<&str> = args
        .keys()
        .map(String::as_str)
        .filter(|name| !stage.recognizes(name))
        .collect();
    if !unknown.is_empty() {
        return Err(Error::invalid_usage(
            stage.name(),
            format!("unexpected arguments: {}", unknown.join(", ")),
        ));
    }
    Ok(())
}

fn prepare(stage: &Stage, args: Args, overlay: &ConfigOverlay) -> Result<PreparedCall> {
    validate_args(stage, &args)?;

    let mut merged = stage.defaults().clone();
    merged.extend(args);
    for name in stage.recognized_params() {
        if let Some(value) = overlay.get(name) {
            merged.insert(name.to_string(), value.clone());
        }
    }

    let missing: Vec<&str> = stage
        .required_params()
        .iter()
        .map(String::as_str)
        .filter(|name| !merged.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(Error::invalid_usage(
            stage.name(),
            format!("missing required arguments: {}", missing.join(", ")),
        ));
    }

    let pending = resolver::unresolved(stage, &merged);
    let parts = merged
        .iter()
        .map(|(name, value)| (name.as_str(), KeyPart::Value(value)))
        .chain(
            pending
                .iter()
                .map(|(name, dep)| (name.as_str(), KeyPart::Dependency(dep.as_str()))),
        );
    let (key, canonical) = derive_key(parts, stage.ignored())
        .map_err(|e| Error::configuration(format!("cannot derive key: {e}")))?;
    tracing::trace!(stage = stage.name(), %key, ?canonical, "Derived cache key");

    Ok(PreparedCall {
        merged,
        pending,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    fn noop(_: &Invocation<'_>) -> std::result::Result<Value, BoxError> {
        Ok(Value::Null)
    }

    fn args(pairs: &[(&str, i64)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::Int(*v)))
            .collect()
    }

    fn double() -> Stage {
        Stage::new("double", noop).param("x").param_default("factor", 2)
    }

    #[test]
    fn test_prepare_merges_defaults_and_overlay() {
        let mut overlay = ConfigOverlay::new();
        let call = prepare(&double(), args(&[("x", 5)]), &overlay).unwrap();
        assert_eq!(call.merged, args(&[("factor", 2), ("x", 5)]));

        overlay.set("factor", 3);
        overlay.set("unrelated", 1);
        let call = prepare(&double(), args(&[("x", 5), ("factor", 9)]), &overlay).unwrap();
        assert_eq!(call.merged, args(&[("factor", 3), ("x", 5)]));
    }

    #[test]
    fn test_explicit_default_shares_key() {
        let overlay = ConfigOverlay::new();
        let a = prepare(&double(), args(&[("x", 5)]), &overlay).unwrap();
        let b = prepare(&double(), args(&[("x", 5), ("factor", 2)]), &overlay).unwrap();
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn test_prepare_rejects_bad_calls() {
        let overlay = ConfigOverlay::new();
        for bad in [args(&[("x", 1), ("force", 1)]), args(&[("x", 1), ("y", 2)]), args(&[])] {
            let err = prepare(&double(), bad, &overlay).unwrap_err();
            assert!(matches!(err, Error::InvalidUsage { .. }), "{err}");
        }
    }

    #[test]
    fn test_overlay_satisfies_required_param() {
        let overlay: ConfigOverlay = [("x", 4)].into_iter().collect();
        let call = prepare(&double(), Args::new(), &overlay).unwrap();
        assert_eq!(call.merged["x"], Value::Int(4));
    }

    #[test]
    fn test_dependency_marker_in_key_and_metadata() {
        let stage = Stage::new("report", noop)
            .param("x")
            .dependency_param("data", "load");
        let overlay = ConfigOverlay::new();

        let marked = prepare(&stage, args(&[("x", 1)]), &overlay).unwrap();
        assert_eq!(marked.pending["data"], "load");
        assert_eq!(
            marked.metadata_args()["data"],
            serde_json::json!("<dependency:load>")
        );

        let literal = prepare(&stage, args(&[("x", 1), ("data", 7)]), &overlay).unwrap();
        assert!(literal.pending.is_empty());
        assert_ne!(marked.key, literal.key);

        let mut marker_as_text = args(&[("x", 1)]);
        marker_as_text.insert("data".to_string(), Value::from("<dependency:load>"));
        let text = prepare(&stage, marker_as_text, &overlay).unwrap();
        assert_ne!(marked.key, text.key);
    }

    #[test]
    fn test_build_rejects_bad_declarations() {
        let tmp = tempfile::TempDir::new().unwrap();
        let reserved = Pipeline::builder(tmp.path())
            .stage(Stage::new("s", noop).param("force"))
            .build()
            .unwrap_err();
        assert!(matches!(reserved, Error::Configuration { .. }));

        let ignored = Pipeline::builder(tmp.path())
            .stage(Stage::new("s", noop).ignore("nope"))
            .build()
            .unwrap_err();
        assert!(ignored.to_string().contains("nope"));

        let bad_name = Pipeline::builder(tmp.path())
            .stage(Stage::new("../escape", noop))
            .build()
            .unwrap_err();
        assert!(matches!(bad_name, Error::Configuration { .. }));

        let duplicate = Pipeline::builder(tmp.path())
            .stage(Stage::new("s", noop))
            .stage(Stage::new("s", noop))
            .build()
            .unwrap_err();
        assert!(matches!(duplicate, Error::Graph { .. }));
    }
}
