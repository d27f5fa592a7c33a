//! Dependency parameter resolution
//!
//! Dependency parameters the caller leaves unset are represented by a marker
//! in the key and only resolved to concrete values when the stage is about to
//! run. Resolution calls the dependency through the same pipeline, forwarding
//! just the arguments the dependency declares.

use crate::Result;
use crate::pipeline::Pipeline;
use crate::stage::{Args, Stage};
use std::collections::BTreeMap;

/// Dependency parameters not present in the merged arguments, mapped to the
/// stage that fills them.
#[must_use]
pub fn unresolved(stage: &Stage, merged: &Args) -> BTreeMap<String, String> {
    stage
        .implicit_dependencies()
        .iter()
        .filter(|(param, _)| !merged.contains_key(*param))
        .map(|(param, dep)| (param.clone(), dep.clone()))
        .collect()
}

/// Subset of `args` that `dependency` declares.
#[must_use]
pub fn forwarded_args(dependency: &Stage, args: &Args) -> Args {
    args.iter()
        .filter(|(name, _)| dependency.recognizes(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Fill every unresolved dependency parameter with its stage's result.
///
/// # Errors
///
/// Returns the first error raised while computing a dependency.
pub fn resolve(
    pipeline: &Pipeline,
    merged: &Args,
    pending: &BTreeMap<String, String>,
) -> Result<Args> {
    let mut resolved = merged.clone();
    for (param, dep_name) in pending {
        let dependency = pipeline.stage(dep_name)?;
        let forwarded = forwarded_args(dependency, merged);
        tracing::debug!(
            param = %param,
            dependency = %dep_name,
            forwarded = forwarded.len(),
            "Resolving dependency parameter"
        );
        let value = pipeline.get_or_compute(dep_name, forwarded)?;
        resolved.insert(param.clone(), value);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::stage::Invocation;
    use stagecache_cache::Value;

    fn noop(_: &Invocation<'_>) -> std::result::Result<Value, BoxError> {
        Ok(Value::Null)
    }

    fn args(pairs: &[(&str, i64)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::Int(*v)))
            .collect()
    }

    #[test]
    fn test_unresolved_skips_supplied_params() {
        let stage = Stage::new("report", noop)
            .dependency_param("data", "load")
            .dependency_param("model", "fit");
        let pending = unresolved(&stage, &args(&[("data", 1)]));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending["model"], "fit");
    }

    #[test]
    fn test_forwarded_args_drop_unknown() {
        let dep = Stage::new("load", noop).param("path").param_default("limit", 10);
        let forwarded = forwarded_args(&dep, &args(&[("path", 1), ("limit", 5), ("extra", 3)]));
        assert_eq!(forwarded, args(&[("limit", 5), ("path", 1)]));
    }
}
