//! Entry storage for stagecache
//!
//! This crate provides the storage half of stage memoization:
//! - A [`Value`] model for stage arguments and results
//! - Canonical rendering of values ([`CacheKeyable`]) and key derivation
//! - A checksummed binary envelope for result artifacts
//! - A [`CacheStore`] persisting (result, metadata) pairs per stage and key,
//!   with an in-process hot layer and per-stage versions
//!
//! # Cache Key Computation
//!
//! Keys are SHA-256 digests over the sorted map of parameter names to their
//! canonical strings. Ignored parameters are dropped and dependency
//! parameters are replaced by a marker naming the dependency, so a key never
//! depends on another stage's output.

mod error;
pub mod envelope;
pub mod key;
pub mod metadata;
pub mod root;
pub mod store;
pub mod value;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use key::{CacheKey, KeyPart, dependency_marker, derive_key};
pub use metadata::{EntryMetadata, UNSET_CONFIG_VALUE, now_timestamp, timestamp_of};
pub use root::{CACHE_DIR_ENV, CacheRootInputs, resolve_cache_root};
pub use store::{CacheStore, EntryPaths, EntrySummary, Freshness, validate_stage_name};
pub use value::{CacheKeyable, Value, canonical_float};
