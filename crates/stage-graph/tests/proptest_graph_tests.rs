//! Property-based tests for stage graph invariants.
//!
//! - Topological order respects every dependency
//! - Cycle detection is accurate
//! - Transitive dependents agree with the topological order

use proptest::prelude::*;
use stagecache_stage_graph::{Error, StageGraph, StageNodeData};
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug)]
struct PropStage {
    deps: Vec<String>,
}

impl StageNodeData for PropStage {
    fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.deps.iter().map(String::as_str)
    }
}

/// Generate a DAG where each stage only depends on stages with lower indices.
fn dag_strategy(
    min_stages: usize,
    max_stages: usize,
) -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    (min_stages..=max_stages).prop_flat_map(|count| {
        let names: Vec<String> = (0..count).map(|i| format!("stage_{i}")).collect();
        let dep_strategies: Vec<_> = (0..count)
            .map(|i| {
                if i == 0 {
                    Just(vec![]).boxed()
                } else {
                    proptest::collection::vec(
                        proptest::sample::select(names[..i].to_vec()),
                        0..=i.min(3),
                    )
                    .boxed()
                }
            })
            .collect();
        dep_strategies.prop_map(move |deps| names.clone().into_iter().zip(deps).collect())
    })
}

fn build_graph(stages: &[(String, Vec<String>)]) -> StageGraph<PropStage> {
    let mut graph = StageGraph::new();
    for (name, deps) in stages {
        graph
            .add_stage(name, PropStage { deps: deps.clone() })
            .unwrap();
    }
    graph.add_dependency_edges().unwrap();
    graph
}

proptest! {
    #[test]
    fn topological_sort_respects_dependencies(stages in dag_strategy(1, 20)) {
        let graph = build_graph(&stages);
        let order = graph.topological_sort().unwrap();
        prop_assert_eq!(order.len(), stages.len());

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        for (name, deps) in &stages {
            for dep in deps {
                prop_assert!(position[dep.as_str()] < position[name.as_str()]);
            }
        }
    }

    #[test]
    fn dags_have_no_cycles(stages in dag_strategy(1, 20)) {
        let graph = build_graph(&stages);
        prop_assert!(graph.find_cycle().is_none());
        prop_assert!(graph.ensure_acyclic().is_ok());
    }

    #[test]
    fn back_edge_creates_cycle(stages in dag_strategy(2, 12)) {
        // Make the first stage depend on the last one, closing a loop through
        // any path from first to last. Add a direct last -> first edge too so a
        // cycle always exists.
        let mut stages = stages;
        let first = stages[0].0.clone();
        let last_index = stages.len() - 1;
        let last = stages[last_index].0.clone();
        stages[0].1.push(last.clone());
        if !stages[last_index].1.contains(&first) {
            stages[last_index].1.push(first.clone());
        }

        let graph = build_graph(&stages);
        prop_assert!(graph.ensure_acyclic().is_err());
        let cycle = graph.find_cycle().unwrap();
        prop_assert!(cycle.contains(&first));
        prop_assert!(cycle.contains(&last));
        let is_cycle_error = matches!(graph.topological_sort(), Err(Error::CycleDetected { .. }));
        prop_assert!(is_cycle_error);
    }

    #[test]
    fn dependents_come_later_in_order(stages in dag_strategy(1, 15)) {
        let graph = build_graph(&stages);
        let order = graph.topological_sort().unwrap();
        for (i, name) in order.iter().enumerate() {
            let later: BTreeSet<&String> = order[i + 1..].iter().collect();
            for dependent in graph.transitive_dependents(name) {
                prop_assert!(later.contains(&dependent));
            }
        }
    }
}
