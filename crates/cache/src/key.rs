//! Cache key derivation
//!
//! A key is the SHA-256 of a JSON object mapping parameter names to their
//! canonical strings. The object is built from a `BTreeMap`, so the
//! serialization is sorted by name and call-site ordering never matters.

use crate::value::{CacheKeyable, Value};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Deterministic cache key for one stage invocation (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing key string, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 64 lowercase hex characters.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let s = hex.into();
        if s.len() != 64 {
            return Err(Error::configuration(format!(
                "cache key must be 64 hex characters, got {}",
                s.len()
            )));
        }
        if !s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(Error::configuration(
                "cache key must contain only lowercase hex digits",
            ));
        }
        Ok(Self(s))
    }

    /// The hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marker placed in the key for a dependency parameter the caller left unset.
#[must_use]
pub fn dependency_marker(stage: &str) -> String {
    format!("<dependency:{stage}>")
}

/// One parameter as it takes part in key derivation.
#[derive(Debug, Clone, Copy)]
pub enum KeyPart<'a> {
    /// A concrete argument value
    Value(&'a Value),
    /// A dependency parameter identified by the stage it resolves from
    Dependency(&'a str),
}

impl KeyPart<'_> {
    fn render(&self) -> String {
        match self {
            Self::Value(v) => v.canonical(),
            Self::Dependency(stage) => dependency_marker(stage),
        }
    }
}

/// Compute the key for a set of effective parameters.
///
/// Names listed in `ignore` are dropped before hashing. Returns the key and
/// the canonical name/string map that was hashed, which is useful for
/// debugging unexpected misses.
///
/// # Errors
///
/// Returns an error if the canonical map cannot be serialized.
pub fn derive_key<'a, I>(
    parts: I,
    ignore: &BTreeSet<String>,
) -> Result<(CacheKey, BTreeMap<String, String>)>
where
    I: IntoIterator<Item = (&'a str, KeyPart<'a>)>,
{
    let canonical: BTreeMap<String, String> = parts
        .into_iter()
        .filter(|(name, _)| !ignore.contains(*name))
        .map(|(name, part)| (name.to_string(), part.render()))
        .collect();
    let bytes = serde_json::to_vec(&canonical)
        .map_err(|e| Error::serialization(format!("Failed to serialize key material: {e}")))?;
    let digest = Sha256::digest(bytes);
    Ok((CacheKey(hex::encode(digest)), canonical))
}
