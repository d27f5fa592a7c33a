//! CLI error types with miette diagnostics

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] stagecache_cache::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] stagecache_core::Error),

    #[error("Failed to write output")]
    #[diagnostic(code(stagecache::cli::output))]
    Output(#[from] std::io::Error),

    #[error("{failed} of {total} cache entries failed verification")]
    #[diagnostic(
        code(stagecache::cli::verify_failed),
        help("Corrupt entries are recomputed on their next use; delete them to reclaim space")
    )]
    VerifyFailed { failed: usize, total: usize },
}
