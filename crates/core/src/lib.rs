//! Dependency-aware memoization of pipeline stages
//!
//! Stages are functions of named arguments whose results are stored on disk
//! and reused on later calls with the same effective arguments. A stage can
//! take another stage's result as a parameter; recomputing the upstream stage
//! invalidates every entry that was built from an older version of it.
//!
//! ```ignore
//! use stagecache_core::{Pipeline, Stage, Value, args};
//!
//! let pipeline = Pipeline::builder("/tmp/cache")
//!     .stage(
//!         Stage::new("double", |inv| Ok(Value::Int(inv.i64("x")? * inv.i64("factor")?)))
//!             .param("x")
//!             .param_default("factor", 2),
//!     )
//!     .build()?;
//!
//! assert_eq!(pipeline.get_or_compute("double", args([("x", 5)]))?, Value::Int(10));
//! ```

pub mod config;
mod error;
pub mod pipeline;
pub mod resolver;
pub mod staleness;
pub mod stage;

pub use config::{ConfigOverlay, OVERLAY_ENV_PREFIX, SETTINGS_FILE, Settings};
pub use error::{BoxError, Error, Result};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use stage::{Args, ArgumentError, Invocation, RESERVED_PARAM, Stage, args};

pub use stagecache_cache::{CacheKey, CacheStore, Value};
