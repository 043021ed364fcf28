//! Dependency graph builder and level computation.
//!
//! Uses `petgraph` to model step dependencies as a directed graph (edge from
//! dependency to dependent). Levels are extracted Kahn-style: every step whose
//! remaining in-degree is zero forms the next level. A round that finds no
//! such step while steps remain means a cycle.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use stepflow_types::workflow::Step;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

fn build_graph(steps: &[Step]) -> Result<(DiGraph<usize, ()>, Vec<NodeIndex>), WorkflowError> {
    let name_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), steps.len());
    let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();

    for (to_idx, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let from_idx = name_to_idx.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                }
            })?;
            graph.add_edge(nodes[*from_idx], nodes[to_idx], ());
        }
    }

    Ok((graph, nodes))
}

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// Group steps into dependency levels.
///
/// Every step in level `k` depends only on steps in levels `< k`; steps within
/// a level keep their declaration order. Index 0 is the first level to run.
pub fn build_levels(steps: &[Step]) -> Result<Vec<Vec<&Step>>, WorkflowError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let (graph, nodes) = build_graph(steps)?;

    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut placed = vec![false; steps.len()];
    let mut remaining = steps.len();
    let mut levels = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = (0..steps.len())
            .filter(|&i| !placed[i] && in_degree[i] == 0)
            .collect();

        if ready.is_empty() {
            let mut stuck: Vec<String> = (0..steps.len())
                .filter(|&i| !placed[i])
                .map(|i| steps[i].name.clone())
                .collect();
            stuck.sort();
            return Err(WorkflowError::CircularDependency { steps: stuck });
        }

        for &i in &ready {
            placed[i] = true;
            remaining -= 1;
            // One decrement per edge, duplicate depends_on entries included.
            for dependent in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
                in_degree[graph[dependent]] -= 1;
            }
        }

        levels.push(ready.into_iter().map(|i| &steps[i]).collect());
    }

    Ok(levels)
}

/// Check that steps form a DAG (no cycles, every dependency exists).
pub fn validate_graph(steps: &[Step]) -> Result<(), WorkflowError> {
    build_levels(steps).map(|_| ())
}

// ---------------------------------------------------------------------------
// Transitive dependency closure
// ---------------------------------------------------------------------------

/// All steps `step` depends on, directly or transitively.
///
/// Returns an empty vec for an unknown step.
pub fn transitive_dependencies<'a>(step: &str, steps: &'a [Step]) -> Vec<&'a str> {
    let by_name: HashMap<&str, &Step> = steps.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack = vec![step];

    while let Some(current) = stack.pop() {
        if let Some(s) = by_name.get(current) {
            for dep in &s.depends_on {
                if let Some(known) = by_name.get(dep.as_str()) {
                    if visited.insert(known.name.as_str()) {
                        stack.push(known.name.as_str());
                    }
                }
            }
        }
    }

    let mut deps: Vec<&str> = visited.into_iter().collect();
    deps.sort_unstable();
    deps
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
