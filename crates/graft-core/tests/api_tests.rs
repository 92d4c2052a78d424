// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use graft_core::{
    clone_graph, graphdef, iter_graph, pop, split, state, Filter, GraftConfig, GraftError, Graph,
    Key, NodeKind, Slot, StateLeaf, Static, Value, Variable, BATCH_STAT, PARAM,
};
use graft_dry_tests::{cyclic_pair, mlp_with_shared_layer, shared_leaf_pair};

mod common;
use common::{leaf_paths, path, value_of};

#[test]
fn iter_graph_visits_each_object_once() {
    let mut graph = Graph::new();
    let mlp = mlp_with_shared_layer(&mut graph).expect("model");
    let items = iter_graph(&graph, mlp.root).expect("iter");
    let rendered: Vec<String> = items.iter().map(|(p, _)| p.to_string()).collect();
    assert_eq!(
        rendered,
        [
            "<root>",
            "layers",
            "layers/0",
            "layers/0/kernel",
            "layers/0/bias",
            "layers/1",
            "layers/1/kernel",
            "layers/1/bias",
            "layers/2",
            "layers/2/scale",
            "layers/2/mean",
            "layers/2/var",
            "scale",
            "step",
        ]
    );
    assert!(!rendered.iter().any(|p| p.starts_with("tied")));
    assert!(matches!(items[0].1, Slot::Node(n) if n == mlp.root));
}

#[test]
fn iter_graph_terminates_on_cycles() {
    let mut graph = Graph::new();
    let (a, b) = cyclic_pair(&mut graph).expect("ring");
    let items = iter_graph(&graph, a).expect("iter");
    let nodes: Vec<_> = items
        .iter()
        .filter_map(|(_, slot)| match slot {
            Slot::Node(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(nodes, [a, b]);
}

#[test]
fn pop_detaches_variables_from_every_alias() {
    let mut graph = Graph::new();
    let pair = shared_leaf_pair(&mut graph).expect("pair");
    let stat = graph.add_variable(Variable::batch_stat(1.0));
    graph.set(pair.root, "stat", stat).expect("set");
    let popped = pop(&mut graph, pair.root, &Filter::from(PARAM)).expect("pop");
    assert_eq!(leaf_paths(&popped), ["left"]);

    let node = graph.node(pair.root).expect("root");
    assert!(node.get(&Key::from("left")).is_none());
    assert!(node.get(&Key::from("right")).is_none());
    assert_eq!(leaf_paths(&state(&graph, pair.root).expect("state")), ["stat"]);
}

#[test]
fn pop_reindexes_lists() {
    let mut graph = Graph::new();
    let root = graph.object("Holder");
    let items = graph.list("Items");
    let stat = graph.add_variable(Variable::batch_stat(0.0));
    let w = graph.add_variable(Variable::param(1.0));
    graph.push(items, stat).expect("push");
    graph.push(items, w).expect("push");
    graph.push(items, Value::Int(3)).expect("push");
    graph.set(root, "items", items).expect("set");

    let popped = pop(&mut graph, root, &Filter::from(BATCH_STAT)).expect("pop");
    assert_eq!(leaf_paths(&popped), ["items/0"]);
    let rest = state(&graph, root).expect("state");
    assert_eq!(leaf_paths(&rest), ["items/0", "items/1"]);
    assert_eq!(value_of(&rest, "items/1"), Value::Int(3));
}

#[test]
fn clone_graph_copies_structure_and_config() {
    let config = GraftConfig::from_json_slice(br#"{"default_stream":"params"}"#).expect("config");
    let mut graph = Graph::with_config(config.clone());
    let mlp = mlp_with_shared_layer(&mut graph).expect("model");
    let (mut copy, copy_root) = clone_graph(&graph, mlp.root).expect("clone");
    assert_eq!(copy.config(), &config);
    assert_eq!(
        graphdef(&copy, copy_root).expect("graphdef"),
        graphdef(&graph, mlp.root).expect("graphdef")
    );
    assert_eq!(
        state(&copy, copy_root).expect("state"),
        state(&graph, mlp.root).expect("state")
    );

    // Writes to the copy do not reach the source.
    let Slot::Var(scale) = copy.lookup(copy_root, &path("scale")).expect("scale").clone() else {
        panic!("scale should be a variable");
    };
    copy.set_value(scale, 9.0).expect("set_value");
    assert_eq!(
        graph.value_at(mlp.root, &path("scale")).expect("scale"),
        &Value::Scalar(2.0)
    );
}

#[test]
fn digest_tracks_structure_not_values() {
    let mut a = Graph::new();
    let mut b = Graph::new();
    let ma = mlp_with_shared_layer(&mut a).expect("model");
    let mb = mlp_with_shared_layer(&mut b).expect("model");
    let da = graphdef(&a, ma.root).expect("graphdef");
    assert_eq!(da.digest(), graphdef(&b, mb.root).expect("graphdef").digest());
    assert_eq!(da.digest_hex().len(), 64);

    b.set(mb.root, "step", Value::UInt(100)).expect("set");
    assert_eq!(da.digest(), graphdef(&b, mb.root).expect("graphdef").digest());

    b.set(mb.root, "mode", Static::from("eval")).expect("set");
    assert_ne!(da.digest(), graphdef(&b, mb.root).expect("graphdef").digest());

    let mut c = Graph::new();
    let mc = mlp_with_shared_layer(&mut c).expect("model");
    let plain = c.add_variable(Variable::param(2.0));
    c.set(mc.root, "scale", plain).expect("set");
    assert_ne!(da.digest(), graphdef(&c, mc.root).expect("graphdef").digest());
}

#[test]
fn pure_states_round_trip_through_replace() {
    let mut graph = Graph::new();
    let mlp = mlp_with_shared_layer(&mut graph).expect("model");
    let (_, mut full) = split(&graph, mlp.root).expect("split");
    let pure = full.to_pure();
    assert!(pure.leaves().all(|(_, leaf)| leaf.variable().is_none()));

    let bumped = pure.map(|_, leaf| match leaf.value() {
        Value::UInt(n) => StateLeaf::from(Value::UInt(n + 1)),
        _ => leaf.clone(),
    });
    full.replace_by_pure(&bumped).expect("replace");
    assert_eq!(value_of(&full, "step"), Value::UInt(1));
    assert!(full.get(&path("layers/0/kernel")).and_then(StateLeaf::variable).is_some());

    let stray = common::single("layers/9/kernel", Value::Scalar(0.0));
    assert_eq!(
        full.replace_by_pure(&stray),
        Err(GraftError::PathNotFound { path: path("layers/9/kernel") })
    );
}

#[test]
fn keys_must_fit_the_node_kind() {
    let mut graph = Graph::new();
    let list = graph.add_node("Seq", NodeKind::List);
    let object = graph.object("Obj");
    assert_eq!(
        graph.set(list, "name", Value::Int(0)),
        Err(GraftError::InvalidKey { node: list, key: Key::from("name") })
    );
    assert_eq!(
        graph.set(object, 0usize, Value::Int(0)),
        Err(GraftError::InvalidKey { node: object, key: Key::Index(0) })
    );
    assert!(matches!(
        graph.push(object, Value::Int(0)),
        Err(GraftError::InvalidKey { .. })
    ));

    let dict = graph.dict("Table");
    graph.set(dict, "a", Value::Int(1)).expect("named key");
    graph.set(dict, 7usize, Value::Int(2)).expect("index key");
    assert_eq!(graph.node(dict).expect("dict").fields().len(), 2);
}
