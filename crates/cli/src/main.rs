//! `stagecache`: inspect and verify a stagecache cache directory.

mod cli;
mod commands;
mod errors;
mod tracing;

use crate::tracing::{TracingConfig, init_tracing};
use stagecache_cache::CacheStore;
use stagecache_core::Settings;
use std::path::Path;

fn main() -> miette::Result<()> {
    let cli = cli::parse();

    init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.log_level.into(),
        filter: None,
    })?;

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::load_from_dir(Path::new("."))?,
    };
    let root = settings.cache_root(cli.cache_dir.clone())?;
    ::tracing::debug!(root = %root.display(), "Using cache root");

    let store = CacheStore::new(root);
    let mut stdout = std::io::stdout().lock();
    commands::run(&cli.command, &store, &mut stdout)?;
    Ok(())
}
