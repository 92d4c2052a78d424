// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph unflattener: `(GraphDef, FlatState)` back to a live graph.
//!
//! Nodes are allocated before their fields are filled, so a back-reference
//! to an ancestor resolves to the node already under construction. Every
//! flat-state entry must be consumed by exactly one leaf marker.
use rustc_hash::FxHashMap;
use tracing::{debug, instrument};

use crate::error::{GraftError, MismatchReason, Result};
use crate::graph::{Graph, Slot};
use crate::graphdef::{AttrDef, Entry, GraphDef, NodeSpec};
use crate::ident::{Index, IndexTable, NodeRef, ObjectRef};
use crate::path::Path;
use crate::state::{FlatState, StateLeaf};
use crate::variable::Variable;

struct Frame {
    node: NodeRef,
    index: Index,
    position: usize,
}

fn malformed(path: Path) -> GraftError {
    GraftError::StructureMismatch {
        path,
        reason: MismatchReason::MalformedDescriptor,
    }
}

fn node_spec<'d>(def: &'d GraphDef, index: Index, path: &Path) -> Result<&'d NodeSpec> {
    match def.entry(index) {
        Some(Entry::Node(spec)) => Ok(spec),
        _ => Err(malformed(path.clone())),
    }
}

/// Rebuilds a graph from a descriptor and a flat state into a fresh arena.
///
/// # Errors
/// See [`Graph::merge`].
pub fn unflatten(def: &GraphDef, flat: FlatState) -> Result<(Graph, NodeRef)> {
    let mut graph = Graph::new();
    let root = graph.merge(def, flat)?;
    Ok((graph, root))
}

impl Graph {
    /// Rebuilds the graph described by `def` into this arena, taking leaf
    /// values from `flat`, and returns the new root.
    ///
    /// Variable markers accept a variable snapshot (used as-is) or a raw
    /// value (wrapped with the marker's metadata); raw leaf markers require
    /// a raw value.
    ///
    /// # Errors
    /// - [`GraftError::StructureMismatch`] when `flat` lacks an expected
    ///   entry, holds an undescribed one, or holds a variable where a raw leaf
    ///   is described, or when `def` is internally inconsistent.
    /// - [`GraftError::CycleWithoutIdentity`] for a back-reference to an index
    ///   that was never constructed.
    ///
    /// On error, nodes allocated so far stay in the arena unreachable.
    #[instrument(level = "debug", skip_all, fields(entries = def.len(), leaves = flat.len()))]
    pub fn merge(&mut self, def: &GraphDef, flat: FlatState) -> Result<NodeRef> {
        let root_spec = node_spec(def, Index::ROOT, &Path::root())?;
        let mut remaining: FxHashMap<Path, (usize, StateLeaf)> = flat
            .into_iter()
            .enumerate()
            .map(|(order, (path, leaf))| (path, (order, leaf)))
            .collect();
        let mut table = IndexTable::with_len(def.len());

        let root = self.add_node(root_spec.type_name.clone(), root_spec.kind);
        table.bind(Index::ROOT, ObjectRef::Node(root));
        let mut path = Path::root();
        let mut stack = vec![Frame {
            node: root,
            index: Index::ROOT,
            position: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let (current, index, position) = (frame.node, frame.index, frame.position);
            frame.position += 1;
            let spec = node_spec(def, index, &path)?;
            let Some((key, attr)) = spec.attributes.get(position) else {
                stack.pop();
                path.pop();
                continue;
            };
            let slot = match attr {
                AttrDef::Node(child_index) => {
                    if table.resolve(*child_index).is_some() {
                        return Err(malformed(path.child(key.clone())));
                    }
                    let child_spec = node_spec(def, *child_index, &path)?;
                    let child = self.add_node(child_spec.type_name.clone(), child_spec.kind);
                    table.bind(*child_index, ObjectRef::Node(child));
                    path.push(key.clone());
                    stack.push(Frame {
                        node: child,
                        index: *child_index,
                        position: 0,
                    });
                    Slot::Node(child)
                }
                AttrDef::NodeRef(target) => match table.resolve(*target) {
                    Some(ObjectRef::Node(node)) => Slot::Node(node),
                    Some(ObjectRef::Var(_)) => return Err(malformed(path.child(key.clone()))),
                    None => return Err(GraftError::CycleWithoutIdentity { index: *target }),
                },
                AttrDef::Variable(var_index) => {
                    let leaf_path = path.child(key.clone());
                    let Some(Entry::Variable(meta)) = def.entry(*var_index) else {
                        return Err(malformed(leaf_path));
                    };
                    if table.resolve(*var_index).is_some() {
                        return Err(malformed(leaf_path));
                    }
                    let variable = match take(&mut remaining, leaf_path)? {
                        StateLeaf::Variable(variable) => variable,
                        StateLeaf::Value(value) => Variable::from_meta(meta.clone(), value),
                    };
                    let var = self.add_variable(variable);
                    table.bind(*var_index, ObjectRef::Var(var));
                    Slot::Var(var)
                }
                AttrDef::VariableRef(target) => match table.resolve(*target) {
                    Some(ObjectRef::Var(var)) => Slot::Var(var),
                    Some(ObjectRef::Node(_)) => return Err(malformed(path.child(key.clone()))),
                    None => return Err(GraftError::CycleWithoutIdentity { index: *target }),
                },
                AttrDef::Leaf => {
                    let leaf_path = path.child(key.clone());
                    match take(&mut remaining, leaf_path.clone())? {
                        StateLeaf::Value(value) => Slot::Leaf(value),
                        StateLeaf::Variable(_) => {
                            return Err(GraftError::StructureMismatch {
                                path: leaf_path,
                                reason: MismatchReason::ExpectedRawLeaf,
                            });
                        }
                    }
                }
                AttrDef::Static(value) => Slot::Static(value.clone()),
            };
            self.push_field_unchecked(current, key.clone(), slot)?;
        }

        if let Some((path, _)) = remaining.into_iter().min_by_key(|(_, (order, _))| *order) {
            return Err(GraftError::StructureMismatch {
                path,
                reason: MismatchReason::Unexpected,
            });
        }
        debug!(root = root.slot(), "merged graph");
        Ok(root)
    }
}

fn take(remaining: &mut FxHashMap<Path, (usize, StateLeaf)>, path: Path) -> Result<StateLeaf> {
    match remaining.remove(&path) {
        Some((_, leaf)) => Ok(leaf),
        None => Err(GraftError::StructureMismatch {
            path,
            reason: MismatchReason::Missing,
        }),
    }
}
