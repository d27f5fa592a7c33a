//! Error types for stage invocation and pipeline construction

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Boxed error returned by stage functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for stagecache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The caller passed arguments the stage cannot accept
    #[error("Invalid call to stage '{stage}': {message}")]
    #[diagnostic(
        code(stagecache::invalid_usage),
        help("Pass only parameters the stage declares, and every required one")
    )]
    InvalidUsage {
        /// Stage that was called
        stage: String,
        /// What was wrong with the call
        message: String,
    },

    /// No stage with this name is registered
    #[error("Unknown stage: {name}")]
    #[diagnostic(code(stagecache::unknown_stage))]
    UnknownStage {
        /// Name that was looked up
        name: String,
    },

    /// The stage function failed; nothing was saved
    #[error("Stage '{stage}' failed")]
    #[diagnostic(code(stagecache::stage_computation))]
    StageComputation {
        /// Stage whose function failed
        stage: String,
        /// Error raised by the stage function
        #[source]
        source: BoxError,
    },

    /// A computed result could not be persisted
    #[error("Failed to persist result of stage '{stage}'")]
    #[diagnostic(
        code(stagecache::persistence),
        help("The result was not cached; the next call recomputes it")
    )]
    Persistence {
        /// Stage whose result was being saved
        stage: String,
        /// Underlying store error
        #[source]
        source: stagecache_cache::Error,
    },

    /// The stage graph is invalid
    #[error("Invalid stage graph: {source}")]
    #[diagnostic(code(stagecache::graph))]
    Graph {
        /// Underlying graph error
        #[source]
        source: stagecache_stage_graph::Error,
    },

    /// Invalid settings or stage declaration
    #[error("Configuration error: {message}")]
    #[diagnostic(code(stagecache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create an invalid usage error
    #[must_use]
    pub fn invalid_usage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUsage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create an unknown stage error
    #[must_use]
    pub fn unknown_stage(name: impl Into<String>) -> Self {
        Self::UnknownStage { name: name.into() }
    }

    /// Create a stage computation error
    #[must_use]
    pub fn stage_computation(stage: impl Into<String>, source: BoxError) -> Self {
        Self::StageComputation {
            stage: stage.into(),
            source,
        }
    }

    /// Create a persistence error
    #[must_use]
    pub fn persistence(stage: impl Into<String>, source: stagecache_cache::Error) -> Self {
        Self::Persistence {
            stage: stage.into(),
            source,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }
}

impl From<stagecache_stage_graph::Error> for Error {
    fn from(source: stagecache_stage_graph::Error) -> Self {
        Self::Graph { source }
    }
}

/// Result type alias for stagecache operations
pub type Result<T> = std::result::Result<T, Error>;
