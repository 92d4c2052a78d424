// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Proptest strategies for random object graphs.
//!
//! A graph is described by a list of [`GraphOp`]s applied to a single root.
//! Indices are taken modulo the number of nodes (or variables) built so far,
//! so every op is valid and every node stays reachable. `Link` ops create
//! sharing and cycles; `ShareVar` ops alias variables across fields.

use graft_core::{Graph, NodeRef, Result, Static, Value, Variable};
use proptest::prelude::*;

/// One construction step.
#[derive(Clone, Debug)]
pub enum GraphOp {
    /// New child node under `parent`.
    Child {
        /// Parent selector.
        parent: usize,
    },
    /// Edge from `parent` to an existing node (sharing or a cycle).
    Link {
        /// Parent selector.
        parent: usize,
        /// Target selector.
        target: usize,
    },
    /// New param variable under `parent`.
    Param {
        /// Parent selector.
        parent: usize,
        /// Initial value.
        value: f64,
    },
    /// Field aliasing an existing variable; skipped while none exist.
    ShareVar {
        /// Parent selector.
        parent: usize,
        /// Variable selector.
        var: usize,
    },
    /// Raw leaf under `parent`.
    Leaf {
        /// Parent selector.
        parent: usize,
        /// Leaf value.
        value: i64,
    },
    /// Static attribute under `parent`.
    Static {
        /// Parent selector.
        parent: usize,
        /// Static value.
        value: i64,
    },
}

/// Up to 32 ops with a mix of structure, sharing, and leaves.
pub fn arb_graph_ops() -> impl Strategy<Value = Vec<GraphOp>> {
    let op = prop_oneof![
        3 => any::<usize>().prop_map(|parent| GraphOp::Child { parent }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(parent, target)| GraphOp::Link { parent, target }),
        3 => (any::<usize>(), -1.0e3f64..1.0e3)
            .prop_map(|(parent, value)| GraphOp::Param { parent, value }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(parent, var)| GraphOp::ShareVar { parent, var }),
        2 => (any::<usize>(), any::<i64>())
            .prop_map(|(parent, value)| GraphOp::Leaf { parent, value }),
        1 => (any::<usize>(), any::<i64>())
            .prop_map(|(parent, value)| GraphOp::Static { parent, value }),
    ];
    prop::collection::vec(op, 0..32)
}

/// Builds the graph described by `ops`; field `i` is named `f{i}`.
pub fn build_graph(ops: &[GraphOp]) -> Result<(Graph, NodeRef)> {
    let mut graph = Graph::new();
    let root = graph.object("Node");
    let mut nodes = vec![root];
    let mut vars = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        let field = format!("f{i}");
        let pick = |sel: usize| nodes[sel % nodes.len()];
        match *op {
            GraphOp::Child { parent } => {
                let parent = pick(parent);
                let child = graph.object("Node");
                graph.set(parent, field, child)?;
                nodes.push(child);
            }
            GraphOp::Link { parent, target } => {
                let (parent, target) = (pick(parent), pick(target));
                graph.set(parent, field, target)?;
            }
            GraphOp::Param { parent, value } => {
                let parent = pick(parent);
                let var = graph.add_variable(Variable::param(value));
                graph.set(parent, field, var)?;
                vars.push(var);
            }
            GraphOp::ShareVar { parent, var } => {
                if !vars.is_empty() {
                    let parent = pick(parent);
                    graph.set(parent, field, vars[var % vars.len()])?;
                }
            }
            GraphOp::Leaf { parent, value } => {
                graph.set(pick(parent), field, Value::Int(value))?;
            }
            GraphOp::Static { parent, value } => {
                graph.set(pick(parent), field, Static::Int(value))?;
            }
        }
    }
    Ok((graph, root))
}
