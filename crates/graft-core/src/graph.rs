// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Arena-backed mutable object graph.
//!
//! Client models are built here: nodes and variables live in two arenas and
//! refer to each other through copyable handles, so sharing and cycles are
//! just repeated handles. All structural mutation goes through explicit
//! mutators that bump a generation counter; cached path indices recorded by
//! [`crate::flatten`] are only trusted while the generation is unchanged.
use std::cell::RefCell;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::GraftConfig;
use crate::error::{GraftError, Result};
use crate::flatten::PathIndex;
use crate::ident::{NodeRef, VarRef};
use crate::path::{Key, Path};
use crate::value::{Static, Value};
use crate::variable::Variable;

/// Container shape of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Structured object with named fields.
    Object,
    /// Sequence with positional keys `0..len`.
    List,
    /// Mapping with arbitrary keys, kept in insertion order.
    Dict,
}

impl NodeKind {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Object => 1,
            Self::List => 2,
            Self::Dict => 3,
        }
    }
}

/// Content of one field.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    /// Child node (possibly shared).
    Node(NodeRef),
    /// Variable (possibly shared).
    Var(VarRef),
    /// Raw leaf value, not wrapped in a variable.
    Leaf(Value),
    /// Static attribute; part of the topology, not the state.
    Static(Static),
}

impl From<NodeRef> for Slot {
    fn from(v: NodeRef) -> Self {
        Self::Node(v)
    }
}

impl From<VarRef> for Slot {
    fn from(v: VarRef) -> Self {
        Self::Var(v)
    }
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Self::Leaf(v)
    }
}

impl From<Static> for Slot {
    fn from(v: Static) -> Self {
        Self::Static(v)
    }
}

/// A structured node: a type name plus ordered fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    type_name: String,
    kind: NodeKind,
    fields: Vec<(Key, Slot)>,
}

impl Node {
    /// Declared type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Container shape.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[(Key, Slot)] {
        &self.fields
    }

    /// Looks up a field by key.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&Slot> {
        self.position(key).map(|i| &self.fields[i].1)
    }

    fn position(&self, key: &Key) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == key)
    }
}

#[derive(Debug)]
struct CachedPaths {
    generation: u64,
    index: Arc<PathIndex>,
}

/// Arena owning every node and variable of one or more object graphs.
///
/// A `Graph` is single-owner: in-place operations take `&mut self`. Nodes
/// that become unreachable stay allocated until the arena is dropped.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    vars: Vec<Variable>,
    generation: u64,
    config: GraftConfig,
    paths: RefCell<FxHashMap<NodeRef, CachedPaths>>,
}

impl Clone for Graph {
    /// Clones the arena; handles stay valid in the copy. Path caches are not carried over.
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            vars: self.vars.clone(),
            generation: self.generation,
            config: self.config.clone(),
            paths: RefCell::default(),
        }
    }
}

impl Graph {
    /// Creates an empty arena with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty arena with `config`.
    #[must_use]
    pub fn with_config(config: GraftConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &GraftConfig {
        &self.config
    }

    /// Structural generation; bumped by every mutator that changes shape.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of nodes allocated in the arena (reachable or not).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of variables allocated in the arena (reachable or not).
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.vars.len()
    }

    /// Allocates an empty node.
    ///
    /// At most [`crate::MAX_OBJECTS`] nodes get distinct handles.
    pub fn add_node(&mut self, type_name: impl Into<String>, kind: NodeKind) -> NodeRef {
        let handle = NodeRef(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(Node {
            type_name: type_name.into(),
            kind,
            fields: Vec::new(),
        });
        handle
    }

    /// Allocates an empty [`NodeKind::Object`] node.
    pub fn object(&mut self, type_name: impl Into<String>) -> NodeRef {
        self.add_node(type_name, NodeKind::Object)
    }

    /// Allocates an empty [`NodeKind::List`] node.
    pub fn list(&mut self, type_name: impl Into<String>) -> NodeRef {
        self.add_node(type_name, NodeKind::List)
    }

    /// Allocates an empty [`NodeKind::Dict`] node.
    pub fn dict(&mut self, type_name: impl Into<String>) -> NodeRef {
        self.add_node(type_name, NodeKind::Dict)
    }

    /// Allocates a variable.
    ///
    /// At most [`crate::MAX_OBJECTS`] variables get distinct handles.
    pub fn add_variable(&mut self, variable: Variable) -> VarRef {
        let handle = VarRef(u32::try_from(self.vars.len()).unwrap_or(u32::MAX));
        self.vars.push(variable);
        handle
    }

    /// Returns the node behind `node`.
    ///
    /// # Errors
    /// [`GraftError::UnknownNode`] for a handle this arena never issued.
    pub fn node(&self, node: NodeRef) -> Result<&Node> {
        self.nodes
            .get(node.slot())
            .ok_or(GraftError::UnknownNode(node))
    }

    fn node_mut(&mut self, node: NodeRef) -> Result<&mut Node> {
        self.nodes
            .get_mut(node.slot())
            .ok_or(GraftError::UnknownNode(node))
    }

    /// Returns the variable behind `var`.
    ///
    /// # Errors
    /// [`GraftError::UnknownVariable`] for a handle this arena never issued.
    pub fn variable(&self, var: VarRef) -> Result<&Variable> {
        self.vars
            .get(var.slot())
            .ok_or(GraftError::UnknownVariable(var))
    }

    pub(crate) fn variable_mut(&mut self, var: VarRef) -> Result<&mut Variable> {
        self.vars
            .get_mut(var.slot())
            .ok_or(GraftError::UnknownVariable(var))
    }

    /// Sets field `key` of `node`, replacing an existing field in place or
    /// appending a new one.
    ///
    /// Objects take named keys; lists take `Key::Index(i)` with `i <= len`
    /// (`i == len` appends); dicts take any key.
    ///
    /// # Errors
    /// [`GraftError::UnknownNode`] or [`GraftError::InvalidKey`].
    pub fn set(&mut self, node: NodeRef, key: impl Into<Key>, slot: impl Into<Slot>) -> Result<()> {
        let key = key.into();
        let slot = slot.into();
        let target = self.node_mut(node)?;
        let valid = match (target.kind, &key) {
            (NodeKind::Object, Key::Name(_)) | (NodeKind::Dict, _) => true,
            (NodeKind::List, Key::Index(i)) => *i <= target.fields.len(),
            _ => false,
        };
        if !valid {
            return Err(GraftError::InvalidKey { node, key });
        }
        match target.position(&key) {
            Some(i) => target.fields[i].1 = slot,
            None => target.fields.push((key, slot)),
        }
        self.touch();
        Ok(())
    }

    /// Appends `slot` to a list node, returning its position.
    ///
    /// # Errors
    /// [`GraftError::UnknownNode`], or [`GraftError::InvalidKey`] if `list`
    /// is not a [`NodeKind::List`].
    pub fn push(&mut self, list: NodeRef, slot: impl Into<Slot>) -> Result<usize> {
        let target = self.node_mut(list)?;
        let position = target.fields.len();
        if target.kind != NodeKind::List {
            return Err(GraftError::InvalidKey {
                node: list,
                key: Key::Index(position),
            });
        }
        target.fields.push((Key::Index(position), slot.into()));
        self.touch();
        Ok(position)
    }

    /// Removes field `key`, returning its slot. Later list entries shift down.
    ///
    /// # Errors
    /// [`GraftError::UnknownNode`].
    pub fn remove(&mut self, node: NodeRef, key: &Key) -> Result<Option<Slot>> {
        let target = self.node_mut(node)?;
        let Some(i) = target.position(key) else {
            return Ok(None);
        };
        let (_, slot) = target.fields.remove(i);
        if target.kind == NodeKind::List {
            for (pos, (k, _)) in target.fields.iter_mut().enumerate().skip(i) {
                *k = Key::Index(pos);
            }
        }
        self.touch();
        Ok(Some(slot))
    }

    /// Returns field `key` of `node`.
    ///
    /// # Errors
    /// [`GraftError::UnknownNode`].
    pub fn get(&self, node: NodeRef, key: &Key) -> Result<Option<&Slot>> {
        Ok(self.node(node)?.get(key))
    }

    /// Resolves `path` from `root` to the slot it names.
    ///
    /// # Errors
    /// [`GraftError::PathNotFound`] if a key is missing or traverses a leaf.
    pub fn lookup(&self, root: NodeRef, path: &Path) -> Result<&Slot> {
        let not_found = || GraftError::PathNotFound { path: path.clone() };
        let (last, prefix) = path.keys().split_last().ok_or_else(not_found)?;
        let mut current = root;
        for key in prefix {
            match self.node(current)?.get(key) {
                Some(Slot::Node(child)) => current = *child,
                _ => return Err(not_found()),
            }
        }
        self.node(current)?.get(last).ok_or_else(not_found)
    }

    /// Resolves `path` to a leaf value, looking through variables.
    ///
    /// # Errors
    /// [`GraftError::PathNotFound`] if the path is missing or names a node or static.
    pub fn value_at(&self, root: NodeRef, path: &Path) -> Result<&Value> {
        match self.lookup(root, path)? {
            Slot::Var(var) => Ok(self.variable(*var)?.value()),
            Slot::Leaf(value) => Ok(value),
            Slot::Node(_) | Slot::Static(_) => Err(GraftError::PathNotFound { path: path.clone() }),
        }
    }

    /// Overwrites a variable's value.
    ///
    /// Value writes never change topology, so cached path indices stay valid.
    ///
    /// # Errors
    /// [`GraftError::UnknownVariable`], or [`GraftError::FrozenVariable`] for
    /// read-only variables.
    pub fn set_value(&mut self, var: VarRef, value: impl Into<Value>) -> Result<()> {
        let target = self.variable_mut(var)?;
        if !target.is_mutable() {
            return Err(GraftError::FrozenVariable(var));
        }
        target.replace_value(value.into());
        Ok(())
    }

    pub(crate) fn write_leaf(
        &mut self,
        node: NodeRef,
        position: usize,
        value: Value,
    ) -> Result<()> {
        let target = self.node_mut(node)?;
        match target.fields.get_mut(position) {
            Some((_, slot @ Slot::Leaf(_))) => {
                *slot = Slot::Leaf(value);
                Ok(())
            }
            _ => Err(GraftError::UnknownNode(node)),
        }
    }

    /// Appends a field without validation or generation bump; used while
    /// rebuilding fresh nodes from a descriptor.
    pub(crate) fn push_field_unchecked(
        &mut self,
        node: NodeRef,
        key: Key,
        slot: Slot,
    ) -> Result<()> {
        self.node_mut(node)?.fields.push((key, slot));
        Ok(())
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        let mut paths = self.paths.borrow_mut();
        if !paths.is_empty() {
            trace!(generation = self.generation, cached = paths.len(), "invalidating path caches");
            paths.clear();
        }
    }

    pub(crate) fn cached_paths(&self, root: NodeRef) -> Option<Arc<PathIndex>> {
        let paths = self.paths.borrow();
        paths
            .get(&root)
            .filter(|c| c.generation == self.generation)
            .map(|c| Arc::clone(&c.index))
    }

    pub(crate) fn store_paths(&self, root: NodeRef, index: Arc<PathIndex>) {
        if !self.config.cache_paths {
            return;
        }
        self.paths.borrow_mut().insert(
            root,
            CachedPaths {
                generation: self.generation,
                index,
            },
        );
    }
}
