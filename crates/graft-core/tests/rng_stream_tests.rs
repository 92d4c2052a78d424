// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use graft_core::{
    split, split_by, state, update, Filter, GraftError, Graph, NodeRef, RngKey, RngStream, Rngs,
    Slot, Variable, RNG_COUNT, RNG_STATE,
};
use graft_dry_tests::{init_tracing, linear};

mod common;
use common::{leaf_paths, path};

fn model_with_rngs(graph: &mut Graph) -> (NodeRef, Rngs) {
    let root = graph.object("Dropout");
    let dense = linear(graph, 2, 2).expect("linear");
    let rngs = Rngs::new(graph, [("params", 0u64), ("dropout", 1u64)]).expect("rngs");
    graph.set(root, "dense", dense).expect("set");
    graph.set(root, "rngs", rngs.node()).expect("set");
    (root, rngs)
}

#[test]
fn streams_are_reproducible_across_arenas() {
    let mut a = Graph::new();
    let mut b = Graph::new();
    let (_, ra) = model_with_rngs(&mut a);
    let (_, rb) = model_with_rngs(&mut b);
    for _ in 0..4 {
        assert_eq!(
            ra.derive(&mut a, "dropout").expect("derive"),
            rb.derive(&mut b, "dropout").expect("derive")
        );
    }
    assert_ne!(
        ra.derive(&mut a, "params").expect("derive"),
        ra.derive(&mut a, "dropout").expect("derive")
    );
}

#[test]
fn rng_state_travels_through_split_and_update() {
    init_tracing();
    let mut graph = Graph::new();
    let (root, rngs) = model_with_rngs(&mut graph);
    let (_, groups) = split_by(&graph, root, &[Filter::from(RNG_STATE), Filter::Everything])
        .expect("split_by");
    assert_eq!(
        leaf_paths(&groups[0]),
        [
            "rngs/params/key",
            "rngs/params/count",
            "rngs/dropout/key",
            "rngs/dropout/count",
        ]
    );
    let saved = groups[0].clone();

    let first: Vec<RngKey> = (0..3)
        .map(|_| rngs.derive(&mut graph, "dropout").expect("derive"))
        .collect();
    update(&mut graph, root, [saved]).expect("restore");
    let replay: Vec<RngKey> = (0..3)
        .map(|_| rngs.derive(&mut graph, "dropout").expect("derive"))
        .collect();
    assert_eq!(first, replay);
}

#[test]
fn tag_filters_pick_out_one_stream() {
    let mut graph = Graph::new();
    let (root, _) = model_with_rngs(&mut graph);
    let groups = state(&graph, root).expect("state").filter(&[Filter::from("dropout")]);
    assert_eq!(leaf_paths(&groups[0]), ["rngs/dropout/key", "rngs/dropout/count"]);
}

#[test]
fn split_children_never_repeat_the_parent() {
    let mut graph = Graph::new();
    let stream = RngStream::new(&mut graph, "params", 3u64).expect("stream");
    let children = stream.split(&mut graph, 8).expect("split");
    let next = stream.derive(&mut graph).expect("derive");
    for child in &children {
        assert_ne!(child.key, next);
        assert_ne!(child.key.fold_in(0), next);
    }
    let mut keys: Vec<_> = children.iter().map(|c| c.key.to_hex()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 8);
}

#[test]
fn fork_yields_independent_replicas() {
    let mut graph = Graph::new();
    let (root, rngs) = model_with_rngs(&mut graph);
    let (def, _) = split(&graph, root).expect("split");

    let replicas = rngs.fork(&mut graph, root, 3).expect("fork");
    assert_eq!(replicas.len(), 3);
    for (_, state) in rngs.snapshot(&graph).expect("snapshot") {
        assert_eq!(state.count, 1);
    }

    let mut draws = Vec::new();
    for (mut copy, copy_root) in replicas {
        assert_eq!(split(&copy, copy_root).expect("split").0, def);
        let Slot::Node(node) = copy.lookup(copy_root, &path("rngs")).expect("rngs").clone() else {
            panic!("rngs should be a node");
        };
        let replica = Rngs::from_node(&copy, node).expect("rngs");
        for (_, state) in replica.snapshot(&copy).expect("snapshot") {
            assert_eq!(state.count, 0);
        }
        draws.push(replica.derive(&mut copy, "dropout").expect("derive"));
    }
    assert_ne!(draws[0], draws[1]);
    assert_ne!(draws[1], draws[2]);
    assert_ne!(draws[0], draws[2]);
}

#[test]
fn fork_requires_a_reachable_collection() {
    let mut graph = Graph::new();
    let root = graph.object("Detached");
    let rngs = Rngs::new(&mut graph, [("default", 0u64)]).expect("rngs");
    assert!(matches!(
        rngs.fork(&mut graph, root, 2),
        Err(GraftError::PathNotFound { .. })
    ));
}

#[test]
fn frozen_counter_blocks_derivation() {
    let mut graph = Graph::new();
    let stream = RngStream::new(&mut graph, "noise", 0u64).expect("stream");
    let frozen = graph.add_variable(Variable::new(RNG_COUNT, 0u64).frozen());
    graph.set(stream.node(), "count", frozen).expect("set");
    assert_eq!(
        stream.derive(&mut graph),
        Err(GraftError::FrozenVariable(frozen))
    );
}

#[test]
fn failed_reset_keeps_the_old_seed() {
    let mut graph = Graph::new();
    let stream = RngStream::new(&mut graph, "noise", 1u64).expect("stream");
    let frozen = graph.add_variable(Variable::new(RNG_COUNT, 0u64).frozen());
    graph.set(stream.node(), "count", frozen).expect("set");
    let before = stream.state(&graph).expect("state");

    assert_eq!(
        stream.reset(&mut graph, 9u64),
        Err(GraftError::FrozenVariable(frozen))
    );
    assert_eq!(stream.state(&graph).expect("state"), before);
    assert_eq!(before.key, RngKey::from_seed(1));
}

#[test]
fn collection_restore_and_split_are_all_or_nothing() {
    let mut graph = Graph::new();
    let rngs = Rngs::new(&mut graph, [("params", 0u64), ("dropout", 1u64)]).expect("rngs");
    let saved = rngs.snapshot(&graph).expect("snapshot");
    rngs.derive(&mut graph, "params").expect("derive");
    let advanced = rngs.snapshot(&graph).expect("snapshot");

    let (_, dropout) = rngs.streams(&graph).expect("streams").remove(1);
    let frozen = graph.add_variable(Variable::new(RNG_COUNT, 0u64).frozen());
    graph.set(dropout.node(), "count", frozen).expect("set");
    let advanced_params = advanced[0].1;

    assert_eq!(
        rngs.restore(&mut graph, &saved),
        Err(GraftError::FrozenVariable(frozen))
    );
    let (_, params) = rngs.streams(&graph).expect("streams").remove(0);
    assert_eq!(params.state(&graph).expect("state"), advanced_params);

    assert_eq!(
        rngs.split(&mut graph, 2).map(|_| ()),
        Err(GraftError::FrozenVariable(frozen))
    );
    assert_eq!(params.state(&graph).expect("state"), advanced_params);
}

#[test]
fn prng_draws_follow_the_stream() {
    let mut a = Graph::new();
    let mut b = Graph::new();
    let sa = RngStream::new(&mut a, "init", 11u64).expect("stream");
    let sb = RngStream::new(&mut b, "init", 11u64).expect("stream");
    let xa = sa.prng(&mut a).expect("prng").uniform(vec![4], -1.0, 1.0);
    let xb = sb.prng(&mut b).expect("prng").uniform(vec![4], -1.0, 1.0);
    assert_eq!(xa, xb);
    let again = sa.prng(&mut a).expect("prng").uniform(vec![4], -1.0, 1.0);
    assert_ne!(xa, again);
}

#[test]
fn reset_matches_a_freshly_seeded_stream() {
    let mut graph = Graph::new();
    let used = RngStream::new(&mut graph, "dropout", 5u64).expect("stream");
    let first = used.derive(&mut graph).expect("derive");
    let second = used.derive(&mut graph).expect("derive");
    assert_ne!(first, second);

    used.reset(&mut graph, 21u64).expect("reset");
    let fresh = RngStream::new(&mut graph, "dropout", 21u64).expect("stream");
    assert_eq!(
        used.derive(&mut graph).expect("derive"),
        fresh.derive(&mut graph).expect("derive")
    );
}
