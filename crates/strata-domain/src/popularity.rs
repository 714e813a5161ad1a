//! Popularity ranking of store paths.
//!
//! A store path referenced (transitively) by many other paths is a good
//! candidate for a layer of its own: it changes rarely and is shared by
//! many images. The weight of a node is the number of paths from the
//! roots of the closure graph down to it.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::closure::StorePath;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("closure graph contains a cycle between {}", .paths.join(", "))]
pub struct CycleError {
    pub paths: Vec<String>,
}

/// Returns every path of the closure graph, most popular first.
///
/// Ties keep the topological order of the graph, so the same input always
/// ranks identically.
pub fn sorted_paths_by_popularity(storepaths: &[StorePath]) -> Result<Vec<String>, CycleError> {
    let graph = closure_digraph(storepaths);
    reject_cycles(&graph)?;

    let order = topological_order(&graph);
    let mut weights = vec![1_u64; graph.node_count()];
    for &node in &order {
        let weight = weights[node.index()];
        for child in graph.neighbors(node) {
            weights[child.index()] = weights[child.index()].saturating_add(weight);
        }
    }

    let mut scored: Vec<(NodeIndex, u64)> = order
        .into_iter()
        .map(|node| (node, weights[node.index()]))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    Ok(scored
        .into_iter()
        .map(|(node, score)| {
            debug!(score, path = %graph[node], "ranked store path");
            graph[node].clone()
        })
        .collect())
}

fn closure_digraph(storepaths: &[StorePath]) -> DiGraph<String, ()> {
    let mut graph = DiGraph::new();
    let mut ids = HashMap::new();
    for storepath in storepaths {
        let from = node_for(&mut graph, &mut ids, &storepath.path);
        for reference in &storepath.references {
            let to = node_for(&mut graph, &mut ids, reference);
            if from == to {
                continue;
            }
            graph.update_edge(from, to, ());
        }
    }
    graph
}

fn node_for<'a>(
    graph: &mut DiGraph<String, ()>,
    ids: &mut HashMap<&'a str, NodeIndex>,
    path: &'a str,
) -> NodeIndex {
    *ids.entry(path)
        .or_insert_with(|| graph.add_node(path.to_string()))
}

fn reject_cycles(graph: &DiGraph<String, ()>) -> Result<(), CycleError> {
    let Some(component) = tarjan_scc(graph)
        .into_iter()
        .find(|component| component.len() > 1)
    else {
        return Ok(());
    };
    let mut paths: Vec<String> = component
        .into_iter()
        .map(|node| graph[node].clone())
        .collect();
    paths.sort();
    Err(CycleError { paths })
}

/// Reverse DFS post-order. Roots and children are visited in the order
/// their paths were first seen.
fn topological_order(graph: &DiGraph<String, ()>) -> Vec<NodeIndex> {
    let children: Vec<Vec<NodeIndex>> = graph
        .node_indices()
        .map(|node| {
            let mut next: Vec<NodeIndex> = graph.neighbors(node).collect();
            next.sort();
            next
        })
        .collect();

    let mut visited = vec![false; graph.node_count()];
    let mut postorder = Vec::with_capacity(graph.node_count());
    for root in graph.node_indices() {
        if visited[root.index()] {
            continue;
        }
        visited[root.index()] = true;
        let mut stack = vec![(root, 0_usize)];
        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            if let Some(&child) = children[node.index()].get(cursor) {
                frame.1 += 1;
                if !visited[child.index()] {
                    visited[child.index()] = true;
                    stack.push((child, 0));
                }
            } else {
                postorder.push(node);
                stack.pop();
            }
        }
    }
    postorder.reverse();
    postorder
}
