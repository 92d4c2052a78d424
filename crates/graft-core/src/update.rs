// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-place update of a live graph from a state.
use tracing::{debug, instrument};

use crate::error::{GraftError, Result};
use crate::flatten::{path_index, LeafSlot};
use crate::graph::Graph;
use crate::ident::{NodeRef, VarRef};
use crate::state::{State, StateLeaf};
use crate::value::Value;

enum Write {
    Var(VarRef, Value),
    Field(NodeRef, usize, Value),
}

impl Graph {
    /// Writes every leaf of `state` into the graph rooted at `root`.
    ///
    /// Node and variable identity is untouched: only value cells and raw
    /// leaf slots change. All entries are validated before the first write,
    /// so on error the graph is left as it was.
    ///
    /// # Errors
    /// - [`GraftError::PathNotFound`] for a path absent from the live graph.
    /// - [`GraftError::TypeMismatch`] if an incoming variable's type differs
    ///   from the live variable's, or a variable targets a raw leaf slot.
    /// - [`GraftError::ImmutableVariable`] if a read-only variable would
    ///   change value.
    #[instrument(
        level = "debug",
        skip_all,
        fields(root = root.slot(), entries = tracing::field::Empty)
    )]
    pub fn update(&mut self, root: NodeRef, state: &State) -> Result<()> {
        let index = path_index(self, root)?;
        let mut writes = Vec::new();
        for (path, leaf) in state.leaves() {
            let Some(slot) = index.get(&path) else {
                return Err(GraftError::PathNotFound { path });
            };
            match (slot, leaf) {
                (LeafSlot::Var(var), incoming) => {
                    let live = self.variable(var)?;
                    if let StateLeaf::Variable(snapshot) = incoming {
                        if snapshot.ty() != live.ty() {
                            return Err(GraftError::TypeMismatch {
                                path,
                                expected: live.ty().name(),
                                found: snapshot.ty().name(),
                            });
                        }
                    }
                    let value = incoming.value();
                    if !live.is_mutable() {
                        if !live.value().same_bits(value) {
                            return Err(GraftError::ImmutableVariable { path });
                        }
                        continue;
                    }
                    writes.push(Write::Var(var, value.clone()));
                }
                (LeafSlot::Field { node, position }, StateLeaf::Value(value)) => {
                    writes.push(Write::Field(node, position, value.clone()));
                }
                (LeafSlot::Field { .. }, StateLeaf::Variable(snapshot)) => {
                    return Err(GraftError::TypeMismatch {
                        path,
                        expected: "raw leaf",
                        found: snapshot.ty().name(),
                    });
                }
            }
        }

        tracing::Span::current().record("entries", writes.len());
        for write in writes {
            match write {
                Write::Var(var, value) => {
                    self.variable_mut(var)?.replace_value(value);
                }
                Write::Field(node, position, value) => self.write_leaf(node, position, value)?,
            }
        }
        debug!("updated graph in place");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::state;
    use crate::path::Path;
    use crate::variable::{Variable, BATCH_STAT};

    fn counter_graph() -> (Graph, NodeRef, VarRef) {
        let mut g = Graph::new();
        let root = g.object("Counter");
        let count = g.add_variable(Variable::batch_stat(0u64));
        g.set(root, "count", count).unwrap();
        g.set(root, "scale", Value::Scalar(1.0)).unwrap();
        (g, root, count)
    }

    fn single(path: &[&str], leaf: StateLeaf) -> State {
        let path: Path = path.iter().map(|k| (*k).into()).collect();
        [(path, leaf)].into_iter().collect()
    }

    #[test]
    fn writes_values_without_reallocating() {
        let (mut g, root, count) = counter_graph();
        let nodes = g.node_count();
        g.update(root, &single(&["count"], Value::UInt(5).into())).unwrap();
        g.update(root, &single(&["scale"], Value::Scalar(2.0).into())).unwrap();
        assert_eq!(g.variable(count).unwrap().value(), &Value::UInt(5));
        assert_eq!(g.value_at(root, &Path::from(["scale"])).unwrap(), &Value::Scalar(2.0));
        assert_eq!(g.node_count(), nodes);
        assert_eq!(g.variable_count(), 1);
    }

    #[test]
    fn rejects_unknown_paths_and_type_changes() {
        let (mut g, root, _) = counter_graph();
        assert!(matches!(
            g.update(root, &single(&["missing"], Value::UInt(1).into())),
            Err(GraftError::PathNotFound { .. })
        ));
        assert_eq!(
            g.update(root, &single(&["count"], Variable::param(1u64).into())),
            Err(GraftError::TypeMismatch {
                path: Path::from(["count"]),
                expected: BATCH_STAT.name(),
                found: "Param",
            })
        );
        assert!(matches!(
            g.update(root, &single(&["scale"], Variable::param(1.0).into())),
            Err(GraftError::TypeMismatch { expected: "raw leaf", .. })
        ));
    }

    #[test]
    fn failed_update_writes_nothing() {
        let (mut g, root, count) = counter_graph();
        let mut patch = state(&g, root).unwrap();
        patch.insert(&Path::from(["count"]), Value::UInt(9).into());
        patch.insert(&Path::from(["ghost"]), Value::UInt(1).into());
        assert!(g.update(root, &patch).is_err());
        assert_eq!(g.variable(count).unwrap().value(), &Value::UInt(0));
    }

    #[test]
    fn frozen_variables_only_accept_their_current_value() {
        let mut g = Graph::new();
        let root = g.object("Frozen");
        let w = g.add_variable(Variable::param(1.0).frozen());
        g.set(root, "w", w).unwrap();
        g.update(root, &single(&["w"], Value::Scalar(1.0).into())).unwrap();
        assert_eq!(
            g.update(root, &single(&["w"], Value::Scalar(3.0).into())),
            Err(GraftError::ImmutableVariable {
                path: Path::from(["w"])
            })
        );
    }

    #[test]
    fn structural_change_refreshes_path_index() {
        let (mut g, root, _) = counter_graph();
        state(&g, root).unwrap();
        g.set(root, "offset", Value::Scalar(0.0)).unwrap();
        g.update(root, &single(&["offset"], Value::Scalar(4.0).into())).unwrap();
        assert_eq!(g.value_at(root, &Path::from(["offset"])).unwrap(), &Value::Scalar(4.0));
    }
}
