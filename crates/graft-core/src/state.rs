// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flat and hierarchical state containers.
//!
//! [`FlatState`] is the ordered `path -> leaf` sequence produced by
//! flattening. [`State`] is the same data grouped into a tree by common path
//! prefixes. Both keep canonical (depth-first) order, and converting between
//! them is lossless: `State::from_flat(s.flatten()) == s`.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{GraftError, Result};
use crate::filter::{Filter, PartitionMode, Selector};
use crate::path::{Key, Path};
use crate::value::Value;
use crate::variable::Variable;

/// One leaf of a state: a variable snapshot or a raw value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StateLeaf {
    /// Snapshot of a variable (value plus metadata).
    Variable(Variable),
    /// Raw value (unwrapped slot, or a pure view of a variable).
    Value(Value),
}

impl StateLeaf {
    /// The leaf's value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        match self {
            Self::Variable(v) => v.value(),
            Self::Value(v) => v,
        }
    }

    /// The variable snapshot, if this leaf carries one.
    #[must_use]
    pub const fn variable(&self) -> Option<&Variable> {
        match self {
            Self::Variable(v) => Some(v),
            Self::Value(_) => None,
        }
    }

    /// Drops the variable wrapper.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Variable(v) => v.into_value(),
            Self::Value(v) => v,
        }
    }

    /// Type tag name, or `"raw leaf"` for unwrapped values.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Variable(v) => v.ty().name(),
            Self::Value(_) => "raw leaf",
        }
    }

    /// Same leaf kind with `value` swapped in.
    #[must_use]
    pub fn with_value(&self, value: Value) -> Self {
        match self {
            Self::Variable(v) => Self::Variable(v.with_value(value)),
            Self::Value(_) => Self::Value(value),
        }
    }
}

impl From<Variable> for StateLeaf {
    fn from(v: Variable) -> Self {
        Self::Variable(v)
    }
}

impl From<Value> for StateLeaf {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// Ordered mapping from unique paths to leaves.
///
/// Serializes as its entry sequence; deserializing rebuilds the index, with
/// later duplicates replacing earlier ones in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(Path, StateLeaf)>", into = "Vec<(Path, StateLeaf)>")]
pub struct FlatState {
    entries: Vec<(Path, StateLeaf)>,
    index: FxHashMap<Path, usize>,
}

impl PartialEq for FlatState {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FlatState {
    /// Creates an empty flat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `leaf` at `path`; an existing entry is replaced in place.
    pub fn insert(&mut self, path: Path, leaf: StateLeaf) {
        if let Some(&i) = self.index.get(&path) {
            self.entries[i].1 = leaf;
            return;
        }
        self.index.insert(path.clone(), self.entries.len());
        self.entries.push((path, leaf));
    }

    /// Leaf at `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&StateLeaf> {
        self.index.get(path).map(|&i| &self.entries[i].1)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &StateLeaf)> {
        self.entries.iter().map(|(p, l)| (p, l))
    }

    /// Paths in canonical order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(p, _)| p)
    }

    /// Consumes the state, returning its entries in canonical order.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Path, StateLeaf)> {
        self.entries
    }
}

impl FromIterator<(Path, StateLeaf)> for FlatState {
    fn from_iter<I: IntoIterator<Item = (Path, StateLeaf)>>(iter: I) -> Self {
        let mut flat = Self::new();
        for (path, leaf) in iter {
            flat.insert(path, leaf);
        }
        flat
    }
}

impl From<Vec<(Path, StateLeaf)>> for FlatState {
    fn from(entries: Vec<(Path, StateLeaf)>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<FlatState> for Vec<(Path, StateLeaf)> {
    fn from(flat: FlatState) -> Self {
        flat.entries
    }
}

impl IntoIterator for FlatState {
    type Item = (Path, StateLeaf);
    type IntoIter = std::vec::IntoIter<(Path, StateLeaf)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Child of a [`State`] branch.
#[derive(Clone, Debug, PartialEq)]
pub enum StateNode {
    /// A leaf.
    Leaf(StateLeaf),
    /// A non-empty sub-tree.
    Branch(State),
}

/// Hierarchical, ordered view over a flat state.
///
/// Branches are never empty. Equality is equality of the canonical leaf
/// sequences.
///
/// `Clone`, `PartialEq`, `Debug`, and `Drop` walk the tree with an explicit
/// stack, so a state nested as deep as any chain flatten accepts is safe to
/// copy, compare, and drop.
#[derive(Default)]
pub struct State {
    entries: Vec<(Key, StateNode)>,
}

impl Clone for State {
    fn clone(&self) -> Self {
        let mut stack = vec![(self.entries.iter(), Vec::with_capacity(self.entries.len()))];
        let mut keys: Vec<&Key> = Vec::new();
        while let Some((source, built)) = stack.last_mut() {
            match source.next() {
                Some((key, StateNode::Leaf(leaf))) => {
                    built.push((key.clone(), StateNode::Leaf(leaf.clone())));
                }
                Some((key, StateNode::Branch(sub))) => {
                    keys.push(key);
                    stack.push((sub.entries.iter(), Vec::with_capacity(sub.entries.len())));
                }
                None => {
                    let entries = core::mem::take(built);
                    stack.pop();
                    let done = Self { entries };
                    match (stack.last_mut(), keys.pop()) {
                        (Some((_, parent)), Some(key)) => {
                            parent.push((key.clone(), StateNode::Branch(done)));
                        }
                        _ => return done,
                    }
                }
            }
        }
        Self::new()
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self.entries.iter(), other.entries.iter())];
        while let Some((left, right)) = stack.last_mut() {
            match (left.next(), right.next()) {
                (None, None) => {
                    stack.pop();
                }
                (Some((ka, a)), Some((kb, b))) if ka == kb => match (a, b) {
                    (StateNode::Leaf(a), StateNode::Leaf(b)) if a == b => {}
                    (StateNode::Branch(a), StateNode::Branch(b)) => {
                        stack.push((a.entries.iter(), b.entries.iter()));
                    }
                    _ => return false,
                },
                _ => return false,
            }
        }
        true
    }
}

impl core::fmt::Debug for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.leaves().map(|(path, leaf)| (path.to_string(), leaf)))
            .finish()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        let mut pending = vec![core::mem::take(&mut self.entries)];
        while let Some(mut entries) = pending.pop() {
            for (_, node) in entries.drain(..) {
                // Emptied before it goes out of scope, so its own drop is shallow.
                if let StateNode::Branch(mut sub) = node {
                    pending.push(core::mem::take(&mut sub.entries));
                }
            }
        }
    }
}

impl State {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups a flat state by path prefix.
    ///
    /// Total: for ill-formed input where one path is a prefix of another the
    /// later entry wins, and entries with an empty path are ignored.
    #[must_use]
    pub fn from_flat(flat: FlatState) -> Self {
        flat.into_iter().collect()
    }

    /// Flattens back to canonical order.
    #[must_use]
    pub fn flatten(&self) -> FlatState {
        self.leaves().map(|(p, l)| (p, l.clone())).collect()
    }

    /// Inserts `leaf` at `path`, replacing whatever was there (including a
    /// whole sub-tree, or a leaf sitting on a prefix of `path`).
    pub fn insert(&mut self, path: &Path, leaf: StateLeaf) {
        let Some((last, prefix)) = path.keys().split_last() else {
            return;
        };
        let mut current = self;
        for key in prefix {
            let position = match current.position(key) {
                Some(i) => {
                    if matches!(current.entries[i].1, StateNode::Leaf(_)) {
                        current.entries[i].1 = StateNode::Branch(Self::new());
                    }
                    i
                }
                None => {
                    current
                        .entries
                        .push((key.clone(), StateNode::Branch(Self::new())));
                    current.entries.len() - 1
                }
            };
            let StateNode::Branch(next) = &mut current.entries[position].1 else {
                return;
            };
            current = next;
        }
        match current.position(last) {
            Some(i) => current.entries[i].1 = StateNode::Leaf(leaf),
            None => current.entries.push((last.clone(), StateNode::Leaf(leaf))),
        }
    }

    fn position(&self, key: &Key) -> Option<usize> {
        // Canonical-order inserts almost always extend the last entry.
        match self.entries.last() {
            Some((last, _)) if last == key => Some(self.entries.len() - 1),
            _ => self.entries.iter().position(|(k, _)| k == key),
        }
    }

    /// Top-level children in canonical order.
    #[must_use]
    pub fn entries(&self) -> &[(Key, StateNode)] {
        &self.entries
    }

    /// Leaf at `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&StateLeaf> {
        let (last, prefix) = path.keys().split_last()?;
        let prefix: Path = prefix.iter().cloned().collect();
        match self.subtree(&prefix)?.child(last)? {
            StateNode::Leaf(leaf) => Some(leaf),
            StateNode::Branch(_) => None,
        }
    }

    /// Sub-state rooted at `prefix` (the whole state for the root path).
    #[must_use]
    pub fn subtree(&self, prefix: &Path) -> Option<&Self> {
        let mut current = self;
        for key in prefix.keys() {
            match current.child(key)? {
                StateNode::Branch(next) => current = next,
                StateNode::Leaf(_) => return None,
            }
        }
        Some(current)
    }

    fn child(&self, key: &Key) -> Option<&StateNode> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    /// Number of leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves().count()
    }

    /// Returns `true` when there are no leaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Leaves with their full paths, in canonical order.
    #[must_use]
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves {
            stack: vec![self.entries.iter()],
            prefix: Vec::new(),
        }
    }

    /// Merges `states` into one; on equal paths, later states win.
    pub fn merge(states: impl IntoIterator<Item = Self>) -> Self {
        let mut iter = states.into_iter();
        let Some(mut merged) = iter.next() else {
            return Self::new();
        };
        for state in iter {
            for (path, leaf) in state.leaves() {
                merged.insert(&path, leaf.clone());
            }
        }
        merged
    }

    /// Splits into one state per filter, first match wins; entries no filter
    /// matches are dropped.
    #[must_use]
    pub fn filter(&self, filters: &[Filter]) -> Vec<Self> {
        let selector = Selector::new(filters, PartitionMode::FirstMatch);
        let mut groups = vec![Self::new(); filters.len()];
        for (path, leaf) in self.leaves() {
            if let Some(group) = selector.select(&path, leaf) {
                groups[group].insert(&path, leaf.clone());
            }
        }
        groups
    }

    /// Splits into one state per filter, first match wins; every entry must
    /// match some filter.
    ///
    /// # Errors
    /// [`GraftError::UnmatchedEntry`] for the first entry no filter matches.
    pub fn partition(&self, filters: &[Filter]) -> Result<Vec<Self>> {
        self.partition_with(filters, PartitionMode::FirstMatch)
    }

    /// [`State::partition`] with an explicit assignment mode.
    ///
    /// # Errors
    /// [`GraftError::UnmatchedEntry`] for the first entry no filter matches.
    pub fn partition_with(&self, filters: &[Filter], mode: PartitionMode) -> Result<Vec<Self>> {
        let selector = Selector::new(filters, mode);
        let mut groups = vec![Self::new(); filters.len()];
        for (path, leaf) in self.leaves() {
            let group = selector
                .select(&path, leaf)
                .ok_or_else(|| GraftError::UnmatchedEntry { path: path.clone() })?;
            groups[group].insert(&path, leaf.clone());
        }
        Ok(groups)
    }

    /// State of the same shape with every leaf replaced by `f(path, leaf)`.
    #[must_use]
    pub fn map(&self, mut f: impl FnMut(&Path, &StateLeaf) -> StateLeaf) -> Self {
        self.leaves()
            .map(|(path, leaf)| {
                let mapped = f(&path, leaf);
                (path, mapped)
            })
            .collect()
    }

    /// Same shape with every variable wrapper stripped to its raw value.
    #[must_use]
    pub fn to_pure(&self) -> Self {
        self.map(|_, leaf| StateLeaf::Value(leaf.value().clone()))
    }

    /// Writes the raw values of `pure` back into this state, keeping each
    /// leaf's wrapper.
    ///
    /// # Errors
    /// [`GraftError::PathNotFound`] for a path of `pure` absent here; nothing
    /// is written in that case.
    pub fn replace_by_pure(&mut self, pure: &Self) -> Result<()> {
        let mut writes = Vec::new();
        for (path, leaf) in pure.leaves() {
            let existing = self
                .get(&path)
                .ok_or_else(|| GraftError::PathNotFound { path: path.clone() })?;
            writes.push((path, existing.with_value(leaf.value().clone())));
        }
        for (path, leaf) in writes {
            self.insert(&path, leaf);
        }
        Ok(())
    }
}

impl FromIterator<(Path, StateLeaf)> for State {
    fn from_iter<I: IntoIterator<Item = (Path, StateLeaf)>>(iter: I) -> Self {
        let mut state = Self::new();
        for (path, leaf) in iter {
            state.insert(&path, leaf);
        }
        state
    }
}

impl From<FlatState> for State {
    fn from(flat: FlatState) -> Self {
        Self::from_flat(flat)
    }
}

/// Depth-first iterator over a [`State`]'s leaves.
#[derive(Debug)]
pub struct Leaves<'a> {
    stack: Vec<core::slice::Iter<'a, (Key, StateNode)>>,
    prefix: Vec<&'a Key>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = (Path, &'a StateLeaf);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.last_mut()?.next() {
                None => {
                    self.stack.pop();
                    self.prefix.pop();
                }
                Some((key, StateNode::Leaf(leaf))) => {
                    let path = self
                        .prefix
                        .iter()
                        .map(|k| (*k).clone())
                        .chain(core::iter::once(key.clone()))
                        .collect();
                    return Some((path, leaf));
                }
                Some((key, StateNode::Branch(sub))) => {
                    self.prefix.push(key);
                    self.stack.push(sub.entries.iter());
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::variable::{BATCH_STAT, PARAM};

    fn sample() -> FlatState {
        [
            (Path::from(["encoder", "kernel"]), Variable::param(1.0).into()),
            (Path::from(["encoder", "bias"]), Variable::param(0.0).into()),
            (Path::from(["bn", "mean"]), Variable::batch_stat(0.5).into()),
            (Path::from(["step"]), StateLeaf::Value(Value::UInt(3))),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn flat_round_trip_preserves_order() {
        let flat = sample();
        let state = State::from_flat(flat.clone());
        assert_eq!(state.flatten(), flat);
        assert_eq!(State::from_flat(state.flatten()), state);
        let keys: Vec<_> = state.entries().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["encoder", "bn", "step"]);
    }

    #[test]
    fn lookup_by_path_and_prefix() {
        let state = State::from_flat(sample());
        assert_eq!(
            state.get(&Path::from(["bn", "mean"])).map(StateLeaf::value),
            Some(&Value::Scalar(0.5))
        );
        assert_eq!(state.get(&Path::from(["bn"])), None);
        let encoder = state.subtree(&Path::from(["encoder"])).unwrap();
        assert_eq!(encoder.len(), 2);
        assert!(encoder.get(&Path::from(["kernel"])).is_some());
        assert!(state.subtree(&Path::from(["step", "deeper"])).is_none());
    }

    #[test]
    fn later_entries_win_on_prefix_conflicts() {
        let state: State = [
            (Path::from(["a"]), StateLeaf::Value(Value::Int(1))),
            (Path::from(["a", "b"]), StateLeaf::Value(Value::Int(2))),
            (Path::root(), StateLeaf::Value(Value::Int(9))),
        ]
        .into_iter()
        .collect();
        assert_eq!(state.len(), 1);
        assert_eq!(
            state.get(&Path::from(["a", "b"])).map(StateLeaf::value),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn merge_prefers_later_states() {
        let base = State::from_flat(sample());
        let patch: State = [(Path::from(["step"]), StateLeaf::Value(Value::UInt(4)))]
            .into_iter()
            .collect();
        let merged = State::merge([base.clone(), patch]);
        assert_eq!(merged.len(), base.len());
        assert_eq!(
            merged.get(&Path::from(["step"])).map(StateLeaf::value),
            Some(&Value::UInt(4))
        );
    }

    #[test]
    fn partition_requires_every_entry_to_match() {
        let state = State::from_flat(sample());
        let err = state
            .partition(&[Filter::from(PARAM), Filter::from(BATCH_STAT)])
            .unwrap_err();
        assert_eq!(
            err,
            GraftError::UnmatchedEntry {
                path: Path::from(["step"])
            }
        );
        let groups = state
            .partition(&[Filter::from(PARAM), Filter::Everything])
            .unwrap();
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 2);
        let filtered = state.filter(&[Filter::from(BATCH_STAT)]);
        assert_eq!(filtered[0].len(), 1);
    }

    #[test]
    fn deep_states_clone_compare_and_drop_iteratively() {
        let deep: Path = (0..300_000usize).map(Key::Index).collect();
        let mut a = State::new();
        a.insert(&deep, StateLeaf::Value(Value::Int(1)));
        a.insert(&Path::from(["side"]), StateLeaf::Value(Value::Int(2)));
        let mut b = a.clone();
        assert!(a == b);
        assert_eq!(b.get(&deep).map(StateLeaf::value), Some(&Value::Int(1)));

        b.insert(&deep, StateLeaf::Value(Value::Int(3)));
        assert!(a != b);
        drop(b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn pure_views_round_trip_through_wrappers() {
        let mut state = State::from_flat(sample());
        let pure = state.to_pure().map(|_, leaf| {
            let x = leaf.value().as_f64().unwrap_or_default();
            StateLeaf::Value(Value::Scalar(x + 1.0))
        });
        assert!(pure.leaves().all(|(_, l)| l.variable().is_none()));
        state.replace_by_pure(&pure).unwrap();
        let kernel = state.get(&Path::from(["encoder", "kernel"])).unwrap();
        assert_eq!(kernel.value(), &Value::Scalar(2.0));
        assert!(kernel.variable().is_some());
        let step = state.get(&Path::from(["step"])).unwrap();
        assert_eq!(step, &StateLeaf::Value(Value::Scalar(4.0)));

        let stray: State = [(Path::from(["nope"]), StateLeaf::Value(Value::Int(0)))]
            .into_iter()
            .collect();
        assert!(matches!(
            state.replace_by_pure(&stray),
            Err(GraftError::PathNotFound { .. })
        ));
    }
}
