//! Stage declarations
//!
//! A [`Stage`] pairs a function with the description the cache needs:
//! which parameters it accepts, their defaults, which ones are excluded from
//! the key, which other stages it reads from and which overlay keys its
//! output depends on.

use crate::config::ConfigOverlay;
use crate::error::BoxError;
use stagecache_cache::Value;
use stagecache_stage_graph::StageNodeData;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Named arguments of a stage call.
pub type Args = BTreeMap<String, Value>;

/// Parameter name that can never be declared or passed; it is the flag of
/// [`Pipeline::ensure_computed`](crate::Pipeline::ensure_computed).
pub const RESERVED_PARAM: &str = "force";

/// Build [`Args`] from name/value pairs.
///
/// ```ignore
/// pipeline.get_or_compute("double", args([("x", 5)]))?;
/// ```
pub fn args<I, K, V>(pairs: I) -> Args
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

type StageFn = dyn Fn(&Invocation<'_>) -> Result<Value, BoxError> + Send + Sync;

/// Error raised by the typed argument accessors of [`Invocation`].
#[derive(Debug, thiserror::Error)]
#[error("argument '{name}' {problem}")]
pub struct ArgumentError {
    name: String,
    problem: String,
}

/// What a stage function sees when it runs.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    stage: &'a str,
    args: &'a Args,
    config: &'a ConfigOverlay,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(stage: &'a str, args: &'a Args, config: &'a ConfigOverlay) -> Self {
        Self {
            stage,
            args,
            config,
        }
    }

    /// Name of the running stage.
    #[must_use]
    pub fn stage(&self) -> &'a str {
        self.stage
    }

    /// Fully resolved arguments, including dependency results.
    #[must_use]
    pub fn args(&self) -> &'a Args {
        self.args
    }

    /// Read-only view of the overlay the call was made with.
    #[must_use]
    pub fn config(&self) -> &'a ConfigOverlay {
        self.config
    }

    /// Look up one argument.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent.
    pub fn value(&self, name: &str) -> Result<&'a Value, ArgumentError> {
        self.args.get(name).ok_or_else(|| ArgumentError {
            name: name.to_string(),
            problem: "is missing".to_string(),
        })
    }

    /// Argument as an integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent or not an integer.
    pub fn i64(&self, name: &str) -> Result<i64, ArgumentError> {
        let value = self.value(name)?;
        value.as_i64().ok_or_else(|| mismatch(name, "an integer", value))
    }

    /// Argument as a float; integers are widened.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent or not numeric.
    pub fn f64(&self, name: &str) -> Result<f64, ArgumentError> {
        let value = self.value(name)?;
        value.as_f64().ok_or_else(|| mismatch(name, "a number", value))
    }

    /// Argument as a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent or not a string.
    pub fn str(&self, name: &str) -> Result<&'a str, ArgumentError> {
        let value = self.value(name)?;
        value.as_str().ok_or_else(|| mismatch(name, "a string", value))
    }

    /// Argument as a boolean.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is absent or not a boolean.
    pub fn bool(&self, name: &str) -> Result<bool, ArgumentError> {
        let value = self.value(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "a boolean", value))
    }
}

fn mismatch(name: &str, expected: &str, actual: &Value) -> ArgumentError {
    ArgumentError {
        name: name.to_string(),
        problem: format!("must be {expected}, got {}", actual.type_name()),
    }
}

/// A cacheable pipeline stage.
///
/// Built with chained declarations:
///
/// ```ignore
/// let double = Stage::new("double", |inv| Ok(Value::Int(inv.i64("x")? * inv.i64("factor")?)))
///     .param("x")
///     .param_default("factor", 2);
/// ```
#[derive(Clone)]
pub struct Stage {
    name: String,
    required: BTreeSet<String>,
    defaults: BTreeMap<String, Value>,
    ignore: BTreeSet<String>,
    dependencies: Vec<String>,
    implicit: BTreeMap<String, String>,
    config_dependencies: BTreeSet<String>,
    func: Arc<StageFn>,
}

impl Stage {
    /// Declare a stage with no parameters.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            required: BTreeSet::new(),
            defaults: BTreeMap::new(),
            ignore: BTreeSet::new(),
            dependencies: Vec::new(),
            implicit: BTreeMap::new(),
            config_dependencies: BTreeSet::new(),
            func: Arc::new(func),
        }
    }

    /// Declare a required parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.defaults.remove(&name);
        self.implicit.remove(&name);
        self.required.insert(name);
        self
    }

    /// Declare a parameter with a default value.
    #[must_use]
    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        self.required.remove(&name);
        self.implicit.remove(&name);
        self.defaults.insert(name, default.into());
        self
    }

    /// Exclude a declared parameter from the cache key.
    #[must_use]
    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        self.ignore.insert(name.into());
        self
    }

    /// Record that this stage's output depends on another stage.
    #[must_use]
    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        if !self.dependencies.contains(&stage) {
            self.dependencies.push(stage);
        }
        self
    }

    /// Declare a parameter whose value is the output of another stage.
    ///
    /// When the caller does not pass it, the parameter takes part in the key
    /// as a marker naming `stage`, and is filled with that stage's result
    /// right before this stage runs.
    #[must_use]
    pub fn dependency_param(mut self, name: impl Into<String>, stage: impl Into<String>) -> Self {
        let name = name.into();
        let stage = stage.into();
        self.required.remove(&name);
        self.defaults.remove(&name);
        self.implicit.insert(name, stage.clone());
        self.depends_on(stage)
    }

    /// Track an overlay key that is not a parameter but affects the output.
    #[must_use]
    pub fn config_depends_on(mut self, key: impl Into<String>) -> Self {
        self.config_dependencies.insert(key.into());
        self
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared defaults.
    #[must_use]
    pub fn defaults(&self) -> &BTreeMap<String, Value> {
        &self.defaults
    }

    /// Parameters without a default that must be supplied.
    #[must_use]
    pub fn required_params(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Every parameter name the stage accepts.
    #[must_use]
    pub fn recognized_params(&self) -> BTreeSet<&str> {
        self.required
            .iter()
            .chain(self.defaults.keys())
            .chain(self.implicit.keys())
            .map(String::as_str)
            .collect()
    }

    /// Whether the stage accepts a parameter.
    #[must_use]
    pub fn recognizes(&self, name: &str) -> bool {
        self.required.contains(name)
            || self.defaults.contains_key(name)
            || self.implicit.contains_key(name)
    }

    /// Parameters excluded from the key.
    #[must_use]
    pub fn ignored(&self) -> &BTreeSet<String> {
        &self.ignore
    }

    /// All stages this stage depends on, explicit first, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Dependency parameters, mapped to the stage that fills them.
    #[must_use]
    pub fn implicit_dependencies(&self) -> &BTreeMap<String, String> {
        &self.implicit
    }

    /// Overlay keys whose values are snapshotted with each entry.
    #[must_use]
    pub fn config_dependencies(&self) -> &BTreeSet<String> {
        &self.config_dependencies
    }

    pub(crate) fn run(&self, invocation: &Invocation<'_>) -> Result<Value, BoxError> {
        (self.func)(invocation)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("defaults", &self.defaults)
            .field("ignore", &self.ignore)
            .field("dependencies", &self.dependencies)
            .field("implicit", &self.implicit)
            .field("config_dependencies", &self.config_dependencies)
            .finish_non_exhaustive()
    }
}

impl StageNodeData for Stage {
    fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(String::as_str)
    }
}
