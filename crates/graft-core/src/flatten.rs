// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph flattener: object graph to `(GraphDef, FlatState)`.
//!
//! The walk is depth-first in field declaration order and uses an explicit
//! frame stack, so arbitrarily deep chains never touch the call stack.
//! Identity (arena handle), not path, decides whether an object was already
//! seen; a repeated object becomes a back-reference and is not revisited,
//! which is what makes cycles terminate.
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};

use crate::error::Result;
use crate::graph::{Graph, Slot};
use crate::graphdef::{AttrDef, Entry, GraphDef, NodeSpec};
use crate::ident::{IdentityRegistry, Index, NodeRef, ObjectRef, Registration, VarRef};
use crate::path::Path;
use crate::state::{FlatState, StateLeaf};

/// Live location of one flat-state entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LeafSlot {
    /// Value cell of a variable.
    Var(VarRef),
    /// Raw leaf field `position` of `node`.
    Field { node: NodeRef, position: usize },
}

/// Path to live slot lookup recorded while flattening one root.
#[derive(Debug, Default)]
pub(crate) struct PathIndex {
    slots: FxHashMap<Path, LeafSlot>,
}

impl PathIndex {
    pub(crate) fn get(&self, path: &Path) -> Option<LeafSlot> {
        self.slots.get(path).copied()
    }
}

struct Frame {
    node: NodeRef,
    index: Index,
    position: usize,
}

/// Flattens the graph reachable from `root`.
///
/// # Errors
/// [`crate::GraftError::UnknownNode`] / [`crate::GraftError::UnknownVariable`]
/// if a handle does not belong to `graph`.
pub fn flatten(graph: &Graph, root: NodeRef) -> Result<(GraphDef, FlatState)> {
    let (def, flat, _) = flatten_indexed(graph, root)?;
    Ok((def, flat))
}

/// Returns the path index for `root`, reusing the cached one while the
/// graph's generation is unchanged.
pub(crate) fn path_index(graph: &Graph, root: NodeRef) -> Result<Arc<PathIndex>> {
    if let Some(index) = graph.cached_paths(root) {
        trace!(root = root.slot(), "path index cache hit");
        return Ok(index);
    }
    let (_, _, index) = flatten_indexed(graph, root)?;
    Ok(index)
}

#[instrument(level = "debug", skip_all, fields(root = root.slot()))]
fn flatten_indexed(graph: &Graph, root: NodeRef) -> Result<(GraphDef, FlatState, Arc<PathIndex>)> {
    let root_node = graph.node(root)?;
    let mut registry = IdentityRegistry::new();
    registry.register(ObjectRef::Node(root));
    let mut entries = vec![Entry::Node(NodeSpec {
        type_name: root_node.type_name().to_owned(),
        kind: root_node.kind(),
        attributes: Vec::new(),
    })];
    let mut flat = FlatState::new();
    let mut slots = FxHashMap::default();
    let mut back_refs = 0usize;

    // path.len() == stack.len() - 1 while the stack is non-empty.
    let mut path = Path::root();
    let mut stack = vec![Frame {
        node: root,
        index: Index::ROOT,
        position: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        let (current, owner, position) = (frame.node, frame.index, frame.position);
        frame.position += 1;
        let Some((key, slot)) = graph.node(current)?.fields().get(position) else {
            stack.pop();
            path.pop();
            continue;
        };
        let attr = match slot {
            Slot::Node(child) => {
                let child_node = graph.node(*child)?;
                match registry.register(ObjectRef::Node(*child)) {
                    Registration::Seen(index) => {
                        back_refs += 1;
                        trace!(%index, field = %key, "node back-reference");
                        AttrDef::NodeRef(index)
                    }
                    Registration::Fresh(index) => {
                        entries.push(Entry::Node(NodeSpec {
                            type_name: child_node.type_name().to_owned(),
                            kind: child_node.kind(),
                            attributes: Vec::new(),
                        }));
                        path.push(key.clone());
                        stack.push(Frame {
                            node: *child,
                            index,
                            position: 0,
                        });
                        AttrDef::Node(index)
                    }
                }
            }
            Slot::Var(var) => {
                let variable = graph.variable(*var)?;
                match registry.register(ObjectRef::Var(*var)) {
                    Registration::Seen(index) => {
                        back_refs += 1;
                        trace!(%index, field = %key, "variable back-reference");
                        AttrDef::VariableRef(index)
                    }
                    Registration::Fresh(index) => {
                        entries.push(Entry::Variable(variable.meta().clone()));
                        let leaf_path = path.child(key.clone());
                        slots.insert(leaf_path.clone(), LeafSlot::Var(*var));
                        flat.insert(leaf_path, StateLeaf::Variable(variable.clone()));
                        AttrDef::Variable(index)
                    }
                }
            }
            Slot::Leaf(value) => {
                let leaf_path = path.child(key.clone());
                slots.insert(
                    leaf_path.clone(),
                    LeafSlot::Field {
                        node: current,
                        position,
                    },
                );
                flat.insert(leaf_path, StateLeaf::Value(value.clone()));
                AttrDef::Leaf
            }
            Slot::Static(value) => AttrDef::Static(value.clone()),
        };
        // Frames always refer to node entries.
        if let Some(Entry::Node(spec)) = entries.get_mut(owner.position()) {
            spec.attributes.push((key.clone(), attr));
        }
    }

    debug!(
        objects = registry.len(),
        leaves = flat.len(),
        back_refs,
        "flattened graph"
    );
    let index = Arc::new(PathIndex { slots });
    graph.store_paths(root, Arc::clone(&index));
    Ok((GraphDef::from_entries(entries), flat, index))
}
