// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use graft_core::{Key, Path, State, StateLeaf, Value};

/// Parses `"layers/0/kernel"` into a path; all-digit segments become list
/// indices.
pub fn path(spec: &str) -> Path {
    if spec.is_empty() {
        return Path::root();
    }
    spec.split('/')
        .map(|seg| match seg.parse::<usize>() {
            Ok(i) => Key::Index(i),
            Err(_) => Key::from(seg),
        })
        .collect()
}

/// State holding a single leaf.
pub fn single(spec: &str, leaf: impl Into<StateLeaf>) -> State {
    [(path(spec), leaf.into())].into_iter().collect()
}

/// Rendered leaf paths of `state`, in canonical order.
pub fn leaf_paths(state: &State) -> Vec<String> {
    state.leaves().map(|(p, _)| p.to_string()).collect()
}

/// Raw value stored at `spec`.
pub fn value_of(state: &State, spec: &str) -> Value {
    state
        .get(&path(spec))
        .map(|leaf| leaf.value().clone())
        .unwrap_or_else(|| panic!("no leaf at {spec}"))
}
