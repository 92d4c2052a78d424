// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Small model graphs used across Graft test suites.
//!
//! Builders take `&mut Graph` and return the handles a test is likely to
//! assert on. Arena errors cannot occur for freshly allocated nodes, so the
//! builders return `Result` only to keep `?` at the call site.

use graft_core::{Array, Graph, NodeRef, Result, Static, Value, VarRef, VarType, Variable, PARAM};

/// Client-declared subtype of [`PARAM`], used by filter ordering tests.
pub static SPECIAL_PARAM: VarType = VarType::subtype("SpecialParam", &PARAM);

/// `Linear` node with static feature counts, a `kernel` and a `bias` param.
pub fn linear(graph: &mut Graph, in_features: usize, out_features: usize) -> Result<NodeRef> {
    let node = graph.object("Linear");
    let kernel = graph.add_variable(Variable::param(Array::full(
        vec![in_features, out_features],
        0.1,
    )));
    let bias = graph.add_variable(Variable::param(Array::zeros(vec![out_features])));
    graph.set(node, "in_features", Static::from(in_features))?;
    graph.set(node, "out_features", Static::from(out_features))?;
    graph.set(node, "kernel", kernel)?;
    graph.set(node, "bias", bias)?;
    Ok(node)
}

/// `BatchNorm` node with `scale` param plus `mean` and `var` batch stats.
pub fn batch_norm(graph: &mut Graph, features: usize) -> Result<NodeRef> {
    let node = graph.object("BatchNorm");
    let scale = graph.add_variable(Variable::param(Array::full(vec![features], 1.0)));
    let mean = graph.add_variable(Variable::batch_stat(Array::zeros(vec![features])));
    let var = graph.add_variable(Variable::batch_stat(Array::full(vec![features], 1.0)));
    graph.set(node, "epsilon", Static::Float(1e-5))?;
    graph.set(node, "scale", scale)?;
    graph.set(node, "mean", mean)?;
    graph.set(node, "var", var)?;
    Ok(node)
}

/// Handles of an [`mlp_with_shared_layer`] model.
#[derive(Clone, Copy, Debug)]
pub struct TiedMlp {
    /// `MLP` root.
    pub root: NodeRef,
    /// `layers` list node.
    pub layers: NodeRef,
    /// Layer referenced from both `layers/0` and `tied`.
    pub shared: NodeRef,
}

/// `MLP` with a `layers` list `[shared, hidden, norm]`, a `tied` field
/// aliasing `layers/0`, a raw `step` counter, and a [`SPECIAL_PARAM`]
/// `scale`.
pub fn mlp_with_shared_layer(graph: &mut Graph) -> Result<TiedMlp> {
    let root = graph.object("MLP");
    let layers = graph.list("Sequential");
    let shared = linear(graph, 2, 3)?;
    let hidden = linear(graph, 3, 3)?;
    let norm = batch_norm(graph, 3)?;
    graph.push(layers, shared)?;
    graph.push(layers, hidden)?;
    graph.push(layers, norm)?;
    let scale = graph.add_variable(Variable::new(SPECIAL_PARAM, 2.0));
    graph.set(root, "layers", layers)?;
    graph.set(root, "tied", shared)?;
    graph.set(root, "scale", scale)?;
    graph.set(root, "step", Value::UInt(0))?;
    Ok(TiedMlp {
        root,
        layers,
        shared,
    })
}

/// Two nodes pointing at each other through `next`, each with a raw `id`.
pub fn cyclic_pair(graph: &mut Graph) -> Result<(NodeRef, NodeRef)> {
    let a = graph.object("Ring");
    let b = graph.object("Ring");
    graph.set(a, "id", Value::Int(0))?;
    graph.set(a, "next", b)?;
    graph.set(b, "id", Value::Int(1))?;
    graph.set(b, "next", a)?;
    Ok((a, b))
}

/// Handles of a [`shared_leaf_pair`] graph.
#[derive(Clone, Copy, Debug)]
pub struct SharedLeafPair {
    /// `Pair` root.
    pub root: NodeRef,
    /// Variable aliased by both `left` and `right`.
    pub leaf: VarRef,
}

/// `Pair` whose `left` and `right` fields alias one variable holding `0`.
pub fn shared_leaf_pair(graph: &mut Graph) -> Result<SharedLeafPair> {
    let root = graph.object("Pair");
    let leaf = graph.add_variable(Variable::param(Value::Int(0)));
    graph.set(root, "left", leaf)?;
    graph.set(root, "right", leaf)?;
    Ok(SharedLeafPair { root, leaf })
}
