// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client-facing functions over live graphs.
//!
//! These compose the flattener, unflattener, state container, and filters
//! into the calls model code makes: split before handing state to the
//! numerical engine, merge or update afterwards.
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::Result;
use crate::filter::Filter;
use crate::flatten::flatten;
use crate::graph::{Graph, Slot};
use crate::graphdef::GraphDef;
use crate::ident::NodeRef;
use crate::path::{Key, Path};
use crate::state::{State, StateLeaf};
use crate::unflatten::unflatten;

/// Splits the graph at `root` into its descriptor and full state.
///
/// # Errors
/// Handle errors from [`flatten`].
pub fn split(graph: &Graph, root: NodeRef) -> Result<(GraphDef, State)> {
    let (def, flat) = flatten(graph, root)?;
    Ok((def, State::from_flat(flat)))
}

/// Splits and partitions the state, one group per filter.
///
/// Every entry must match a filter; assignment follows the arena's
/// configured [`crate::PartitionMode`].
///
/// # Errors
/// [`crate::GraftError::UnmatchedEntry`] plus handle errors.
pub fn split_by(
    graph: &Graph,
    root: NodeRef,
    filters: &[Filter],
) -> Result<(GraphDef, Vec<State>)> {
    let (def, state) = split(graph, root)?;
    let groups = state.partition_with(filters, graph.config().partition_mode)?;
    Ok((def, groups))
}

/// Rebuilds a graph from a descriptor and one or more states (later states
/// win on overlapping paths).
///
/// # Errors
/// See [`Graph::merge`].
pub fn merge(def: &GraphDef, states: impl IntoIterator<Item = State>) -> Result<(Graph, NodeRef)> {
    unflatten(def, State::merge(states).flatten())
}

/// Writes one or more states into the live graph in place.
///
/// # Errors
/// See [`Graph::update`].
pub fn update(
    graph: &mut Graph,
    root: NodeRef,
    states: impl IntoIterator<Item = State>,
) -> Result<()> {
    graph.update(root, &State::merge(states))
}

/// Full state of the graph at `root`.
///
/// # Errors
/// Handle errors from [`flatten`].
pub fn state(graph: &Graph, root: NodeRef) -> Result<State> {
    Ok(split(graph, root)?.1)
}

/// Filtered state groups; entries no filter matches are dropped.
///
/// # Errors
/// Handle errors from [`flatten`].
pub fn state_by(graph: &Graph, root: NodeRef, filters: &[Filter]) -> Result<Vec<State>> {
    Ok(state(graph, root)?.filter(filters))
}

/// Topology descriptor of the graph at `root`.
///
/// # Errors
/// Handle errors from [`flatten`].
pub fn graphdef(graph: &Graph, root: NodeRef) -> Result<GraphDef> {
    Ok(flatten(graph, root)?.0)
}

/// Structural copy of the graph at `root` in a fresh arena with the same
/// configuration. Sharing and cycles are preserved inside the copy.
///
/// # Errors
/// Handle errors from [`flatten`].
pub fn clone_graph(graph: &Graph, root: NodeRef) -> Result<(Graph, NodeRef)> {
    let (def, flat) = flatten(graph, root)?;
    let mut copy = Graph::with_config(graph.config().clone());
    let copy_root = copy.merge(&def, flat)?;
    Ok((copy, copy_root))
}

/// Every distinct node and leaf reachable from `root`, each with the path
/// of its first occurrence, in canonical pre-order. The root comes first
/// with the empty path. Static attributes are not listed.
///
/// # Errors
/// Handle errors for foreign handles.
pub fn iter_graph(graph: &Graph, root: NodeRef) -> Result<Vec<(Path, Slot)>> {
    graph.node(root)?;
    let mut seen_nodes = FxHashSet::default();
    let mut seen_vars = FxHashSet::default();
    seen_nodes.insert(root);
    let mut out = vec![(Path::root(), Slot::Node(root))];

    let mut path = Path::root();
    let mut stack = vec![(root, 0usize)];
    while let Some((node, position)) = stack.last_mut() {
        let current = *node;
        let field = *position;
        *position += 1;
        let Some((key, slot)) = graph.node(current)?.fields().get(field) else {
            stack.pop();
            path.pop();
            continue;
        };
        match slot {
            Slot::Node(child) => {
                if seen_nodes.insert(*child) {
                    graph.node(*child)?;
                    out.push((path.child(key.clone()), slot.clone()));
                    path.push(key.clone());
                    stack.push((*child, 0));
                }
            }
            Slot::Var(var) => {
                if seen_vars.insert(*var) {
                    graph.variable(*var)?;
                    out.push((path.child(key.clone()), slot.clone()));
                }
            }
            Slot::Leaf(_) => out.push((path.child(key.clone()), slot.clone())),
            Slot::Static(_) => {}
        }
    }
    Ok(out)
}

/// Removes every variable matching `filter` from the graph at `root` and
/// returns them as a state.
///
/// Matching uses each variable's first path. A shared variable is removed
/// from every field holding it.
///
/// # Errors
/// Handle errors for foreign handles.
pub fn pop(graph: &mut Graph, root: NodeRef, filter: &Filter) -> Result<State> {
    let predicate = filter.compile();
    let items = iter_graph(graph, root)?;
    let mut popped = FxHashSet::default();
    let mut out = State::new();
    let mut nodes = Vec::new();
    for (path, slot) in &items {
        match slot {
            Slot::Node(node) => nodes.push(*node),
            Slot::Var(var) => {
                let leaf = StateLeaf::Variable(graph.variable(*var)?.clone());
                if predicate.matches(path, &leaf) {
                    popped.insert(*var);
                    out.insert(path, leaf);
                }
            }
            Slot::Leaf(_) | Slot::Static(_) => {}
        }
    }

    let mut removed = 0usize;
    for node in nodes {
        let doomed: Vec<Key> = graph
            .node(node)?
            .fields()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Var(v) if popped.contains(v)))
            .map(|(key, _)| key.clone())
            .collect();
        // Reverse order keeps earlier list positions valid while removing.
        for key in doomed.iter().rev() {
            graph.remove(node, key)?;
            removed += 1;
        }
    }
    debug!(variables = popped.len(), fields = removed, "popped variables");
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::variable::{Variable, BATCH_STAT, PARAM};

    fn model() -> (Graph, NodeRef) {
        let mut g = Graph::new();
        let root = g.object("Model");
        let dense = g.object("Dense");
        let bn = g.object("BatchNorm");
        let kernel = g.add_variable(Variable::param(1.0));
        let mean = g.add_variable(Variable::batch_stat(0.0));
        g.set(dense, "kernel", kernel).unwrap();
        g.set(bn, "mean", mean).unwrap();
        g.set(root, "dense", dense).unwrap();
        g.set(root, "bn", bn).unwrap();
        g.set(root, "step", Value::UInt(0)).unwrap();
        (g, root)
    }

    #[test]
    fn iter_graph_lists_first_paths_in_pre_order() {
        let (g, root) = model();
        let paths: Vec<_> = iter_graph(&g, root)
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(
            paths,
            ["<root>", "dense", "dense/kernel", "bn", "bn/mean", "step"]
        );
    }

    #[test]
    fn pop_removes_matching_variables() {
        let (mut g, root) = model();
        let popped = pop(&mut g, root, &Filter::from(BATCH_STAT)).unwrap();
        assert_eq!(popped.len(), 1);
        assert!(popped.get(&Path::from(["bn", "mean"])).is_some());
        let rest = state(&g, root).unwrap();
        assert!(rest.get(&Path::from(["bn", "mean"])).is_none());
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn split_by_then_merge_round_trips() {
        let (g, root) = model();
        let (def, groups) =
            split_by(&g, root, &[Filter::from(PARAM), Filter::Everything]).unwrap();
        assert_eq!(groups.len(), 2);
        let (rebuilt, new_root) = merge(&def, groups).unwrap();
        assert_eq!(graphdef(&rebuilt, new_root).unwrap(), def);
        assert_eq!(state(&rebuilt, new_root).unwrap(), state(&g, root).unwrap());
    }
}
