//! Configuration overlay and settings file
//!
//! The overlay is a flat map of parameter names to values. Any stage that
//! declares a parameter of the same name receives the overlay value in place
//! of the caller's argument or the declared default. The overlay is owned by
//! a [`Pipeline`](crate::Pipeline) and passed explicitly into each call.
//!
//! Settings are read from a `stagecache.toml` file:
//!
//! ```toml
//! [cache]
//! dir = "/var/cache/stagecache"
//!
//! [overlay]
//! threshold = 0.75
//! chunk_size = 512
//! ```
//!
//! Environment variables named `STAGECACHE_OVERLAY_<NAME>` add or replace
//! overlay entries; the name is lower-cased.

use crate::{Error, Result};
use serde::Deserialize;
use stagecache_cache::{CacheRootInputs, Value, resolve_cache_root};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Prefix of environment variables that set overlay values.
pub const OVERLAY_ENV_PREFIX: &str = "STAGECACHE_OVERLAY_";

/// Default name of the settings file.
pub const SETTINGS_FILE: &str = "stagecache.toml";

/// Process-wide parameter overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverlay {
    values: BTreeMap<String, Value>,
}

impl ConfigOverlay {
    /// Create an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All overrides, sorted by name.
    #[must_use]
    pub fn get_all(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Override for one name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Set an override, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    /// Remove an override, returning it.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Copy every entry of `other` into this overlay; `other` wins on conflict.
    pub fn merge(&mut self, other: Self) {
        self.values.extend(other.values);
    }

    /// Whether the overlay holds no overrides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build an overlay from a TOML table.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented.
    pub fn from_toml(table: &toml::Table) -> Result<Self> {
        let values = table
            .iter()
            .map(|(name, value)| Ok((name.clone(), value_from_toml(value)?)))
            .collect::<Result<_>>()?;
        Ok(Self { values })
    }

    /// Build an overlay from `STAGECACHE_OVERLAY_*` variables of the process
    /// environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build an overlay from `(name, value)` pairs shaped like environment
    /// variables. Pairs without the overlay prefix are skipped.
    ///
    /// Values are parsed as TOML (`42`, `0.5`, `true`, `"text"`, `[1, 2]`);
    /// anything that does not parse is kept as a plain string.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut values = BTreeMap::new();
        for (key, raw) in vars {
            let Some(name) = key.as_ref().strip_prefix(OVERLAY_ENV_PREFIX) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let name = name.to_ascii_lowercase();
            let value = parse_env_value(raw.as_ref());
            tracing::debug!(name = %name, value = %value, "Overlay value from environment");
            values.insert(name, value);
        }
        Self { values }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConfigOverlay {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse_env_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Str(raw.to_string());
    }
    toml::from_str::<toml::Table>(&format!("v = {trimmed}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .and_then(|value| value_from_toml(&value).ok())
        .unwrap_or_else(|| Value::Str(raw.to_string()))
}

fn value_from_toml(value: &toml::Value) -> Result<Value> {
    Ok(match value {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(i) => Value::Int(*i),
        toml::Value::Float(f) => Value::Float(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::Str(dt.to_string()),
        toml::Value::Array(items) => {
            Value::List(items.iter().map(value_from_toml).collect::<Result<_>>()?)
        }
        toml::Value::Table(table) => Value::Map(
            table
                .iter()
                .map(|(k, v)| Ok((k.clone(), value_from_toml(v)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

/// `[cache]` section of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Cache root directory; discovered when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Contents of a `stagecache.toml` settings file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Cache location
    #[serde(default)]
    pub cache: CacheSettings,
    /// Parameter overrides
    #[serde(default)]
    pub overlay: toml::Table,
}

impl Settings {
    /// Parse settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid settings TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid settings: {e}")))
    }

    /// Read settings from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("Cannot read settings {}: {e}", path.display()))
        })?;
        let settings = Self::from_toml_str(&content).map_err(|e| match e {
            Error::Configuration { message } => {
                Error::configuration(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Read `stagecache.toml` from `dir` if it exists, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            tracing::debug!(dir = %dir.display(), "No settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Overlay from the file, with `STAGECACHE_OVERLAY_*` variables applied
    /// on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the `[overlay]` table cannot be converted.
    pub fn overlay(&self) -> Result<ConfigOverlay> {
        let mut overlay = ConfigOverlay::from_toml(&self.overlay)?;
        overlay.merge(ConfigOverlay::from_env());
        Ok(overlay)
    }

    /// Resolve the cache root, preferring `explicit` over the settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if no writable cache directory can be found.
    pub fn cache_root(&self, explicit: Option<PathBuf>) -> Result<PathBuf> {
        let explicit = explicit.or_else(|| self.cache.dir.clone());
        resolve_cache_root(CacheRootInputs::from_env(explicit))
            .map_err(|e| Error::configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_basic_operations() {
        let mut overlay = ConfigOverlay::new();
        assert!(overlay.is_empty());
        assert_eq!(overlay.set("threshold", "low"), None);
        assert_eq!(overlay.get("threshold"), Some(&Value::from("low")));
        assert_eq!(
            overlay.set("threshold", "high"),
            Some(Value::from("low"))
        );
        assert_eq!(overlay.get_all().len(), 1);
        assert_eq!(overlay.remove("threshold"), Some(Value::from("high")));
        assert!(overlay.get("threshold").is_none());
    }

    #[test]
    fn test_overlay_merge_prefers_other() {
        let mut base: ConfigOverlay = [("a", 1), ("b", 2)].into_iter().collect();
        let other: ConfigOverlay = [("b", 20), ("c", 30)].into_iter().collect();
        base.merge(other);
        assert_eq!(base.get("a"), Some(&Value::Int(1)));
        assert_eq!(base.get("b"), Some(&Value::Int(20)));
        assert_eq!(base.get("c"), Some(&Value::Int(30)));
    }

    #[test]
    fn test_overlay_from_vars_parses_values() {
        let overlay = ConfigOverlay::from_vars([
            ("STAGECACHE_OVERLAY_CHUNK_SIZE", "512"),
            ("STAGECACHE_OVERLAY_THRESHOLD", "0.5"),
            ("STAGECACHE_OVERLAY_VERBOSE", "true"),
            ("STAGECACHE_OVERLAY_LABEL", "plain words"),
            ("STAGECACHE_OVERLAY_QUOTED", "\"7\""),
            ("STAGECACHE_OVERLAY_IDS", "[1, 2]"),
            ("STAGECACHE_OVERLAY_", "skipped"),
            ("PATH", "/usr/bin"),
        ]);
        assert_eq!(overlay.get("chunk_size"), Some(&Value::Int(512)));
        assert_eq!(overlay.get("threshold"), Some(&Value::Float(0.5)));
        assert_eq!(overlay.get("verbose"), Some(&Value::Bool(true)));
        assert_eq!(overlay.get("label"), Some(&Value::from("plain words")));
        assert_eq!(overlay.get("quoted"), Some(&Value::from("7")));
        assert_eq!(
            overlay.get("ids"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
        assert_eq!(overlay.get_all().len(), 6);
    }

    #[test]
    fn test_overlay_from_env() {
        temp_env::with_vars(
            [
                ("STAGECACHE_OVERLAY_FACTOR", Some("3")),
                ("STAGECACHE_OVERLAY_MODE", None),
            ],
            || {
                let overlay = ConfigOverlay::from_env();
                assert_eq!(overlay.get("factor"), Some(&Value::Int(3)));
                assert!(overlay.get("mode").is_none());
            },
        );
    }

    #[test]
    fn test_settings_parse() {
        let settings = Settings::from_toml_str(
            r#"
            [cache]
            dir = "/tmp/stagecache-test"

            [overlay]
            threshold = 0.75
            names = ["a", "b"]
            "#,
        )
        .unwrap();
        assert_eq!(
            settings.cache.dir,
            Some(PathBuf::from("/tmp/stagecache-test"))
        );
        let overlay = ConfigOverlay::from_toml(&settings.overlay).unwrap();
        assert_eq!(overlay.get("threshold"), Some(&Value::Float(0.75)));
        assert_eq!(
            overlay.get("names"),
            Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn test_settings_reject_unknown_sections() {
        let err = Settings::from_toml_str("[unknown]\nx = 1\n").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_settings_env_overrides_file() {
        let settings = Settings::from_toml_str("[overlay]\nfactor = 2\nkeep = 1\n").unwrap();
        temp_env::with_var("STAGECACHE_OVERLAY_FACTOR", Some("5"), || {
            let overlay = settings.overlay().unwrap();
            assert_eq!(overlay.get("factor"), Some(&Value::Int(5)));
            assert_eq!(overlay.get("keep"), Some(&Value::Int(1)));
        });
    }

    #[test]
    fn test_load_from_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(
            Settings::load_from_dir(tmp.path()).unwrap(),
            Settings::default()
        );

        std::fs::write(tmp.path().join(SETTINGS_FILE), "[cache]\ndir = \"x\"\n").unwrap();
        let settings = Settings::load_from_dir(tmp.path()).unwrap();
        assert_eq!(settings.cache.dir, Some(PathBuf::from("x")));

        std::fs::write(tmp.path().join(SETTINGS_FILE), "not toml [").unwrap();
        let err = Settings::load_from_dir(tmp.path()).unwrap_err();
        assert!(err.to_string().contains(SETTINGS_FILE));
    }

    #[test]
    fn test_cache_root_prefers_explicit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = Settings {
            cache: CacheSettings {
                dir: Some(tmp.path().join("from-settings")),
            },
            ..Settings::default()
        };
        let explicit = tmp.path().join("explicit");
        assert_eq!(
            settings.cache_root(Some(explicit.clone())).unwrap(),
            explicit
        );
        assert_eq!(
            settings.cache_root(None).unwrap(),
            tmp.path().join("from-settings")
        );
    }

    #[test]
    fn test_cache_root_rejects_unusable_setting() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("cache-file");
        std::fs::write(&file, b"x").unwrap();
        let settings = Settings {
            cache: CacheSettings { dir: Some(file) },
            ..Settings::default()
        };
        let err = settings.cache_root(None).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }), "{err}");
    }
}
