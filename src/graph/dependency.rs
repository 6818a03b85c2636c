//! Dependency analysis: turning the declared pass/resource tables into the
//! minimal ordered list of passes required to produce the backbuffer.
//!
//! Traversal starts from the producers of the backbuffer source and walks
//! write→read edges backwards. History inputs never contribute dependencies;
//! they observe the previous frame. Cycles are caught on the DFS path, and the
//! surviving subgraph is additionally validated (and exported for debugging)
//! through [`petgraph`].

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use petgraph::algo::toposort;
use petgraph::graph::Graph;

use crate::error::Error;
use crate::graph::pass::RenderPass;
use crate::graph::resource::RenderResource;

/// Dependency graph over the surviving passes. Node weights are pass names,
/// edge weights the name of the resource carrying the dependency.
pub(crate) type PassDependencyGraph = Graph<String, String>;

/// Compute the ordered list of passes needed to render the backbuffer source.
pub(crate) fn order_passes(
    passes: &[RenderPass],
    resources: &[RenderResource],
    backbuffer: usize,
) -> Result<Vec<usize>> {
    let backbuffer_resource = &resources[backbuffer];
    if backbuffer_resource.written_in_passes.is_empty() {
        return Err(Error::UnproducedResource(backbuffer_resource.name.clone()).into());
    }

    let mut traverser = Traverser {
        passes,
        resources,
        pass_stack: Vec::new(),
        handled: HashSet::new(),
        on_path: vec![false; passes.len()],
    };
    for writer in sorted(&backbuffer_resource.written_in_passes) {
        traverser.traverse(writer)?;
    }

    let mut stack = traverser.pass_stack;
    filter_passes(&mut stack);
    Ok(stack)
}

/// Writers iterate in index order so bakes are deterministic.
fn sorted(set: &HashSet<usize>) -> Vec<usize> {
    let mut list: Vec<usize> = set.iter().copied().collect();
    list.sort_unstable();
    list
}

/// Collapse duplicate entries, preserving the earliest occurrence. Producers
/// are appended before their consumers during traversal, so the earliest
/// occurrence is the one that satisfies every consumer.
fn filter_passes(list: &mut Vec<usize>) {
    let mut seen = HashSet::new();
    list.retain(|&pass| seen.insert(pass));
}

struct Traverser<'a> {
    passes: &'a [RenderPass],
    resources: &'a [RenderResource],
    pass_stack: Vec<usize>,
    handled: HashSet<usize>,
    on_path: Vec<bool>,
}

impl Traverser<'_> {
    /// Post-order DFS over producer edges. A back-edge to a pass still on the
    /// DFS path is a cycle.
    fn traverse(&mut self, pass_index: usize) -> Result<()> {
        if self.on_path[pass_index] {
            return Err(Error::GraphHasCycle(self.passes[pass_index].name.clone()).into());
        }
        if self.handled.contains(&pass_index) {
            return Ok(());
        }
        self.on_path[pass_index] = true;

        let pass = &self.passes[pass_index];
        for resource in pass.dependency_inputs() {
            let res = &self.resources[resource];
            if res.written_in_passes.contains(&pass_index) && !pass.is_input_twin(resource) {
                return Err(Error::SelfDependency(pass.name.clone(), res.name.clone()).into());
            }
            for producer in sorted(&res.written_in_passes) {
                if producer != pass_index {
                    self.traverse(producer)?;
                }
            }
        }

        self.on_path[pass_index] = false;
        self.handled.insert(pass_index);
        self.pass_stack.push(pass_index);
        Ok(())
    }
}

/// Build the petgraph view of the surviving passes, used for validation and
/// for dot export.
pub(crate) fn build_dependency_graph(
    passes: &[RenderPass],
    resources: &[RenderResource],
    order: &[usize],
) -> PassDependencyGraph {
    let mut graph = Graph::new();
    let mut nodes = HashMap::new();
    for &pass in order {
        nodes.insert(pass, graph.add_node(passes[pass].name.clone()));
    }
    for &pass in order {
        for resource in passes[pass].dependency_inputs() {
            let res = &resources[resource];
            for writer in sorted(&res.written_in_passes) {
                if writer == pass {
                    continue;
                }
                if let Some(&source) = nodes.get(&writer) {
                    graph.add_edge(source, nodes[&pass], res.name.clone());
                }
            }
        }
    }
    graph
}

/// Check the computed order: every resource consumed by a surviving pass has a
/// writer (the backbuffer source may come from the framework), all writers
/// precede all readers, and the surviving subgraph is acyclic.
pub(crate) fn validate_passes(
    passes: &[RenderPass],
    resources: &[RenderResource],
    order: &[usize],
    backbuffer: usize,
    graph: &PassDependencyGraph,
) -> Result<()> {
    let position: HashMap<usize, usize> =
        order.iter().enumerate().map(|(i, &p)| (p, i)).collect();

    // History inputs observe last frame's value and never show up in
    // read_in_passes, but they still need a producer to observe.
    for &pass in order {
        for &resource in &passes[pass].history_inputs {
            let res = &resources[resource];
            if res.written_in_passes.is_empty() && res.index != backbuffer {
                return Err(Error::UnproducedResource(res.name.clone()).into());
            }
        }
    }

    for res in resources {
        let readers: Vec<usize> = res
            .read_in_passes
            .iter()
            .filter(|reader| position.contains_key(reader))
            .copied()
            .collect();
        if readers.is_empty() {
            continue;
        }
        if res.written_in_passes.is_empty() {
            if res.index != backbuffer {
                return Err(Error::UnproducedResource(res.name.clone()).into());
            }
            continue;
        }
        for &writer in &res.written_in_passes {
            let Some(&write_position) = position.get(&writer) else {
                continue;
            };
            for &reader in &readers {
                if reader != writer && position[&reader] < write_position {
                    return Err(Error::Uncategorized(
                        "computed pass order places a reader before a writer",
                    )
                    .into());
                }
            }
        }
    }

    toposort(graph, None)
        .map_err(|cycle| Error::GraphHasCycle(graph[cycle.node_id()].clone()))?;
    Ok(())
}
