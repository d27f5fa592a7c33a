//! Stage graph builder using petgraph.
//!
//! Edges point from a dependency to the stage that consumes it, so a
//! topological order lists every stage after the stages it reads from.

use crate::{Error, Result, StageNodeData};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

/// A node in the stage graph.
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    /// Name of the stage.
    pub name: String,
    /// The stage data.
    pub stage: T,
}

/// Stage graph for dependency validation and ordering.
pub struct StageGraph<T: StageNodeData> {
    graph: DiGraph<GraphNode<T>, ()>,
    name_to_node: HashMap<String, NodeIndex>,
}

impl<T: StageNodeData> StageGraph<T> {
    /// Create a new empty stage graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
        }
    }

    /// Add a stage to the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateStage`] if the name is already taken.
    pub fn add_stage(&mut self, name: &str, stage: T) -> Result<NodeIndex> {
        if self.name_to_node.contains_key(name) {
            return Err(Error::DuplicateStage {
                name: name.to_string(),
            });
        }

        let node_index = self.graph.add_node(GraphNode {
            name: name.to_string(),
            stage,
        });
        self.name_to_node.insert(name.to_string(), node_index);
        debug!("Added stage node '{}'", name);

        Ok(node_index)
    }

    /// Get a reference to a stage node by name.
    #[must_use]
    pub fn get_node_by_name(&self, name: &str) -> Option<&GraphNode<T>> {
        self.name_to_node
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Add dependency edges after all stages have been added.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage depends on a stage that was never added.
    pub fn add_dependency_edges(&mut self) -> Result<()> {
        let mut missing_deps = Vec::new();
        let mut edges_to_add = Vec::new();

        for (node_index, node) in self.graph.node_references() {
            for dep_name in node.stage.dependency_names() {
                if let Some(&dep_node_index) = self.name_to_node.get(dep_name) {
                    edges_to_add.push((dep_node_index, node_index));
                } else {
                    missing_deps.push((node.name.clone(), dep_name.to_string()));
                }
            }
        }

        if !missing_deps.is_empty() {
            return Err(Error::MissingDependencies {
                missing: missing_deps,
            });
        }

        for (from, to) in edges_to_add {
            if self.graph.find_edge(from, to).is_none() {
                self.graph.add_edge(from, to, ());
            }
        }

        Ok(())
    }

    /// Find the stages of one dependency cycle, sorted by name.
    ///
    /// A stage that depends on itself is reported as a cycle of one.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| match component.as_slice() {
                [single] => self.graph.find_edge(*single, *single).is_some(),
                _ => true,
            })
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|idx| self.graph[idx].name.clone())
                    .collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles.into_iter().next()
    }

    /// Reject a graph whose dependencies loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] naming the stages of one cycle.
    pub fn ensure_acyclic(&self) -> Result<()> {
        match self.find_cycle() {
            Some(stages) => Err(Error::CycleDetected { stages }),
            None => Ok(()),
        }
    }

    /// Get stage names in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        self.ensure_acyclic()?;

        match toposort(&self.graph, None) {
            Ok(sorted_indices) => Ok(sorted_indices
                .into_iter()
                .map(|idx| self.graph[idx].name.clone())
                .collect()),
            Err(_) => Err(Error::TopologicalSortFailed {
                reason: "petgraph toposort failed".to_string(),
            }),
        }
    }

    /// Names of every stage that reads, directly or transitively, from `name`.
    ///
    /// Unknown names yield an empty set.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.name_to_node.get(name) else {
            return seen;
        };

        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if seen.insert(self.graph[next].name.clone()) {
                    queue.push_back(next);
                }
            }
        }
        // A stage on a cycle reaches itself; it is not its own dependent.
        seen.remove(name);
        seen
    }

    /// Get the number of stages in the graph.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a stage exists in the graph.
    #[must_use]
    pub fn contains_stage(&self, name: &str) -> bool {
        self.name_to_node.contains_key(name)
    }

    /// Iterate over all nodes in insertion order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &GraphNode<T>> {
        self.graph.node_references().map(|(_, node)| node)
    }
}

impl<T: StageNodeData> Default for StageGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}
