// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use bytes::Bytes;
use graft_core::{
    flatten, register_variable_type, state, unflatten, FlatState, GraphDef, Graph, Rngs, Slot,
    Value, VarType, Variable, PARAM,
};
use graft_dry_tests::{mlp_with_shared_layer, SPECIAL_PARAM};

mod common;
use common::path;

static LOCAL_ONLY: VarType = VarType::subtype("LocalOnlyParam", &PARAM);

#[test]
fn descriptor_and_flat_state_survive_json() {
    register_variable_type(&SPECIAL_PARAM).expect("register");
    let mut graph = Graph::new();
    let mlp = mlp_with_shared_layer(&mut graph).expect("model");
    let rngs = Rngs::new(&mut graph, [("dropout", 3u64)]).expect("rngs");
    graph.set(mlp.root, "rngs", rngs.node()).expect("set");
    graph
        .set(mlp.root, "blob", Value::Bytes(Bytes::from_static(b"opaque")))
        .expect("set");
    rngs.derive(&mut graph, "dropout").expect("derive");

    let (def, flat) = flatten(&graph, mlp.root).expect("flatten");
    let bytes = serde_json::to_vec(&(&def, &flat)).expect("serialize");
    let (def_back, flat_back): (GraphDef, FlatState) =
        serde_json::from_slice(&bytes).expect("deserialize");
    assert_eq!(def_back, def);
    assert_eq!(def_back.digest(), def.digest());
    assert_eq!(flat_back, flat);

    let (mut rebuilt, root) = unflatten(&def_back, flat_back).expect("unflatten");
    assert_eq!(
        state(&rebuilt, root).expect("state"),
        state(&graph, mlp.root).expect("state")
    );
    assert_eq!(
        rebuilt.lookup(root, &path("tied")).expect("tied"),
        rebuilt.lookup(root, &path("layers/0")).expect("shared")
    );

    let Slot::Node(node) = rebuilt.lookup(root, &path("rngs")).expect("rngs").clone() else {
        panic!("rngs should be a node");
    };
    let restored = Rngs::from_node(&rebuilt, node).expect("rngs");
    assert_eq!(
        restored.derive(&mut rebuilt, "dropout").expect("derive"),
        rngs.derive(&mut graph, "dropout").expect("derive")
    );
}

#[test]
fn unregistered_types_do_not_deserialize() {
    let mut graph = Graph::new();
    let root = graph.object("Adapter");
    let w = graph.add_variable(Variable::new(LOCAL_ONLY, 1.0));
    graph.set(root, "w", w).expect("set");

    let (def, flat) = flatten(&graph, root).expect("flatten");
    let def_json = serde_json::to_string(&def).expect("serialize");
    let flat_json = serde_json::to_string(&flat).expect("serialize");
    assert!(def_json.contains(r#"["LocalOnlyParam","Param"]"#));
    assert!(serde_json::from_str::<GraphDef>(&def_json).is_err());
    assert!(serde_json::from_str::<FlatState>(&flat_json).is_err());
}
