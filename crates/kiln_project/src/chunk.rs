//! Condensation of the module graph into compilation chunks.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::module::Module;

/// A group of modules compiled as one unit.
///
/// A chunk is a strongly connected component of the module dependency graph:
/// either a single module or a cycle of modules that depend on each other.
/// Modules inside a chunk are listed in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Names of the modules in this chunk.
    pub modules: Vec<String>,
}

impl Chunk {
    /// Returns `true` if the chunk contains more than one module.
    pub fn is_cyclic(&self) -> bool {
        self.modules.len() > 1
    }

    /// Returns `true` if the chunk contains the given module.
    pub fn contains(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m == module)
    }
}

/// Computes the chunks of `modules`, dependencies before dependents.
///
/// Only edges between modules of the given set are considered. Dependencies
/// on names outside the set are ignored.
pub(crate) fn sorted_chunks<'a>(modules: impl IntoIterator<Item = &'a Module>) -> Vec<Chunk> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    let modules: Vec<&Module> = modules.into_iter().collect();

    let mut names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();
    names.sort_unstable();
    for name in names {
        nodes.insert(name, graph.add_node(name));
    }
    for module in &modules {
        let from = nodes[module.name.as_str()];
        let deps: BTreeSet<&str> = module.dependencies.iter().map(String::as_str).collect();
        for dep in deps {
            if let Some(&to) = nodes.get(dep) {
                graph.add_edge(from, to, ());
            }
        }
    }

    // Tarjan yields components in reverse topological order of the edges,
    // and edges point at dependencies, so dependencies come out first.
    tarjan_scc(&graph)
        .into_iter()
        .map(|component| {
            let mut modules: Vec<String> =
                component.into_iter().map(|ix| graph[ix].to_string()).collect();
            modules.sort();
            Chunk { modules }
        })
        .collect()
}
