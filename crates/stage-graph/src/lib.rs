//! Stage dependency graph for stagecache.
//!
//! Stages name the stages they depend on; this crate wires those names into
//! a petgraph DAG, rejects missing dependencies and cycles, and answers
//! ordering questions.
//!
//! # Key Types
//!
//! - [`StageGraph`]: The graph of registered stages
//! - [`StageNodeData`]: Trait that stage types implement to be stored in the graph
//! - [`GraphNode`]: A node in the graph containing the stage name and data
//!
//! # Example
//!
//! ```ignore
//! use stagecache_stage_graph::{StageGraph, StageNodeData};
//!
//! struct Def {
//!     depends_on: Vec<String>,
//! }
//!
//! impl StageNodeData for Def {
//!     fn dependency_names(&self) -> impl Iterator<Item = &str> {
//!         self.depends_on.iter().map(String::as_str)
//!     }
//! }
//!
//! let mut graph = StageGraph::new();
//! graph.add_stage("load", Def { depends_on: vec![] })?;
//! graph.add_stage("embed", Def { depends_on: vec!["load".to_string()] })?;
//! graph.add_dependency_edges()?;
//!
//! let order = graph.topological_sort()?;
//! ```

mod error;
mod graph;

pub use error::{Error, Result};
pub use graph::{GraphNode, StageGraph};

/// Trait for stage data that can be stored in the stage graph.
pub trait StageNodeData {
    /// Returns the names of stages this stage depends on.
    fn dependency_names(&self) -> impl Iterator<Item = &str>;
}
