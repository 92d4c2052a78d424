// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Arena handles, traversal indices, and the identity registry.
//!
//! Object identity in Graft is arena identity: two slots that hold the same
//! [`NodeRef`] (or [`VarRef`]) refer to the same object, no matter how equal
//! two distinct objects happen to look. Every traversal owns a fresh
//! [`IdentityRegistry`] that numbers objects in first-encounter order; those
//! numbers ([`Index`]) are what a [`crate::GraphDef`] stores instead of
//! native references.
use blake3::Hasher;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Canonical 256-bit hash used for descriptor digests and RNG key material.
pub type Hash = [u8; 32];

/// Number of distinct handles (and traversal indices) a `u32` can address.
pub const MAX_OBJECTS: u64 = 1 << 32;

/// Handle to a node stored in a [`crate::Graph`] arena.
///
/// Handles are only meaningful for the arena that issued them. Passing a
/// handle to a different arena yields [`crate::GraftError::UnknownNode`] (or,
/// worse, silently addresses an unrelated node if the slot happens to exist).
///
/// Handles are `u32`: an arena holds at most [`MAX_OBJECTS`] nodes and as
/// many variables. Allocations past that bound saturate to the last handle
/// and alias it; the arena does not check.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeRef(pub(crate) u32);

impl NodeRef {
    /// Returns the arena slot backing this handle.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a variable stored in a [`crate::Graph`] arena.
///
/// Bounded like [`NodeRef`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VarRef(pub(crate) u32);

impl VarRef {
    /// Returns the arena slot backing this handle.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

/// Identity of any object a traversal can meet more than once.
///
/// Raw leaf values and static attributes are plain values and never get an
/// identity; only nodes and variables can be shared.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ObjectRef {
    /// A structured node.
    Node(NodeRef),
    /// A variable (leaf box).
    Var(VarRef),
}

/// Traversal-local identifier assigned in first-encounter order.
///
/// Nodes and variables share one index space; the root of a traversal is
/// always `Index(0)`. A traversal that reaches more than [`MAX_OBJECTS`]
/// distinct objects saturates like the arena handles do.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index(pub u32);

impl Index {
    /// Index of the traversal root.
    pub const ROOT: Self = Self(0);

    /// Returns the index as a table position.
    #[must_use]
    pub const fn position(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for Index {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of [`IdentityRegistry::register`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Registration {
    /// First encounter; the object was assigned this index.
    Fresh(Index),
    /// The object was already registered in this traversal.
    Seen(Index),
}

impl Registration {
    /// The index regardless of freshness.
    #[must_use]
    pub const fn index(self) -> Index {
        match self {
            Self::Fresh(i) | Self::Seen(i) => i,
        }
    }
}

/// Per-traversal registry mapping object identity to traversal indices.
///
/// Scope is exactly one flatten (or unflatten) call. Registration never
/// fails; callers decide what "already seen" means for them.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    ids: FxHashMap<ObjectRef, Index>,
}

impl IdentityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object`, allocating the next index on first encounter.
    pub fn register(&mut self, object: ObjectRef) -> Registration {
        if let Some(index) = self.ids.get(&object) {
            return Registration::Seen(*index);
        }
        // Saturates past MAX_OBJECTS; see the bound on NodeRef.
        let index = Index(u32::try_from(self.ids.len()).unwrap_or(u32::MAX));
        self.ids.insert(object, index);
        Registration::Fresh(index)
    }

    /// Returns the index previously assigned to `object`, if any.
    #[must_use]
    pub fn get(&self, object: ObjectRef) -> Option<Index> {
        self.ids.get(&object).copied()
    }

    /// Number of distinct objects registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` when nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Inverse table used while rebuilding a graph: `Index -> object`.
#[derive(Debug, Default)]
pub(crate) struct IndexTable {
    objects: Vec<Option<ObjectRef>>,
}

impl IndexTable {
    pub(crate) fn with_len(len: usize) -> Self {
        Self {
            objects: vec![None; len],
        }
    }

    pub(crate) fn bind(&mut self, index: Index, object: ObjectRef) {
        if let Some(slot) = self.objects.get_mut(index.position()) {
            debug_assert!(slot.is_none(), "index {index} bound twice");
            *slot = Some(object);
        }
    }

    pub(crate) fn resolve(&self, index: Index) -> Option<ObjectRef> {
        self.objects.get(index.position()).copied().flatten()
    }
}

/// Produces a domain-separated BLAKE3 digest over `parts`.
///
/// Each part is length-prefixed (8-byte little-endian) so concatenation
/// ambiguities cannot produce collisions across part boundaries.
pub(crate) fn domain_hash(domain: &[u8], parts: &[&[u8]]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}
