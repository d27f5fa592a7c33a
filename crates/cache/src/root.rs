//! Cache root directory discovery

use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::path::PathBuf;

/// Environment variable that pins the cache root.
pub const CACHE_DIR_ENV: &str = "STAGECACHE_CACHE_DIR";

/// Inputs for determining the cache root directory
#[derive(Debug, Clone, Default)]
pub struct CacheRootInputs {
    /// Explicit directory from settings or the command line
    pub explicit: Option<PathBuf>,
    /// Value of `STAGECACHE_CACHE_DIR`
    pub env_override: Option<PathBuf>,
    /// Value of `XDG_CACHE_HOME`
    pub xdg_cache_home: Option<PathBuf>,
    /// Platform cache directory
    pub os_cache_dir: Option<PathBuf>,
    /// User home directory
    pub home_dir: Option<PathBuf>,
    /// Last-resort temporary directory
    pub temp_dir: PathBuf,
}

impl CacheRootInputs {
    /// Gather inputs from the process environment.
    #[must_use]
    pub fn from_env(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            env_override: non_empty_env(CACHE_DIR_ENV),
            xdg_cache_home: non_empty_env("XDG_CACHE_HOME"),
            os_cache_dir: cache_dir(),
            home_dir: home_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Pick the cache root.
///
/// An explicit directory is used as given, without probing or creating it;
/// it is an error for it to name something other than a directory.
/// Otherwise the first writable discovered candidate wins:
/// 1) STAGECACHE_CACHE_DIR
/// 2) XDG_CACHE_HOME/stagecache
/// 3) OS cache dir/stagecache
/// 4) ~/.stagecache/cache
/// 5) TMPDIR/stagecache/cache
///
/// # Errors
///
/// Returns an error if the explicit directory is unusable, or if no
/// discovered candidate can be created or written to.
pub fn resolve_cache_root(inputs: CacheRootInputs) -> Result<PathBuf> {
    if let Some(dir) = inputs.explicit {
        return explicit_root(dir);
    }

    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.env_override.filter(|d| !d.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("stagecache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("stagecache"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".stagecache/cache"));
    }
    candidates.push(inputs.temp_dir.join("stagecache/cache"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // Some CI environments provide read-only cache directories under $HOME.
        if path.exists() {
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Cache root not writable: {e}");
                    continue;
                }
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn explicit_root(dir: PathBuf) -> Result<PathBuf> {
    if dir.as_os_str().is_empty() {
        return Err(Error::configuration("Cache directory must not be empty"));
    }
    match std::fs::metadata(&dir) {
        Ok(meta) if meta.is_dir() => Ok(dir),
        Ok(_) => Err(Error::configuration(format!(
            "Cache directory {} exists but is not a directory",
            dir.display()
        ))),
        // Created by the first save.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(dir),
        Err(e) => Err(Error::configuration(format!(
            "Cache directory {} is not accessible: {e}",
            dir.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cache_root_skips_homeless_shelter() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheRootInputs {
            xdg_cache_home: Some(PathBuf::from("/homeless-shelter/.cache")),
            home_dir: Some(PathBuf::from("/homeless-shelter")),
            temp_dir: tmp.path().to_path_buf(),
            ..CacheRootInputs::default()
        };
        let dir = resolve_cache_root(inputs).unwrap();
        assert!(!dir.starts_with("/homeless-shelter"));
        assert!(dir.starts_with(tmp.path()));
    }

    #[test]
    fn cache_root_prefers_explicit_over_env() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("explicit");
        let env = tmp.path().join("env");
        let inputs = CacheRootInputs {
            explicit: Some(explicit.clone()),
            env_override: Some(env),
            temp_dir: tmp.path().to_path_buf(),
            ..CacheRootInputs::default()
        };
        assert_eq!(resolve_cache_root(inputs).unwrap(), explicit);
        assert!(!explicit.exists());
    }

    #[test]
    fn cache_root_rejects_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let inputs = CacheRootInputs {
            explicit: Some(file),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            temp_dir: tmp.path().join("fallback"),
            ..CacheRootInputs::default()
        };
        let err = resolve_cache_root(inputs).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }), "{err}");
        assert!(!tmp.path().join("xdg").exists());
        assert!(!tmp.path().join("fallback").exists());
    }

    #[test]
    fn cache_root_keeps_existing_explicit_dir() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheRootInputs {
            explicit: Some(tmp.path().to_path_buf()),
            temp_dir: tmp.path().join("fallback"),
            ..CacheRootInputs::default()
        };
        assert_eq!(resolve_cache_root(inputs).unwrap(), tmp.path());
    }

    #[test]
    fn cache_root_respects_env_override() {
        let tmp = TempDir::new().unwrap();
        let env = tmp.path().join("from-env");
        let inputs = CacheRootInputs {
            env_override: Some(env.clone()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            temp_dir: tmp.path().to_path_buf(),
            ..CacheRootInputs::default()
        };
        assert_eq!(resolve_cache_root(inputs).unwrap(), env);
    }

    #[test]
    fn cache_root_uses_xdg_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheRootInputs {
            xdg_cache_home: Some(tmp.path().join("xdg")),
            temp_dir: tmp.path().to_path_buf(),
            ..CacheRootInputs::default()
        };
        assert_eq!(
            resolve_cache_root(inputs).unwrap(),
            tmp.path().join("xdg").join("stagecache")
        );
    }
}
