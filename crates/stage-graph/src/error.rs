//! Error types for stage graph operations.

use std::fmt;

/// Result type for stage graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during stage graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A dependency cycle was detected in the graph.
    CycleDetected {
        /// Stages taking part in the cycle, sorted by name.
        stages: Vec<String>,
    },

    /// Stages depend on stages that were never registered.
    MissingDependencies {
        /// List of (stage, missing_dependency) pairs.
        missing: Vec<(String, String)>,
    },

    /// Two stages were registered under the same name.
    DuplicateStage {
        /// The name registered twice.
        name: String,
    },

    /// Failed to perform topological sort.
    TopologicalSortFailed {
        /// Reason for the failure.
        reason: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { stages } => {
                write!(f, "Cycle detected in stage graph: {}", stages.join(" <-> "))
            }
            Self::MissingDependencies { missing } => {
                let list = missing
                    .iter()
                    .map(|(stage, dep)| format!("Stage '{stage}' depends on missing stage '{dep}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Missing dependencies: {list}")
            }
            Self::DuplicateStage { name } => {
                write!(f, "Stage '{name}' is registered more than once")
            }
            Self::TopologicalSortFailed { reason } => {
                write!(f, "Failed to sort stages topologically: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
