// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Topology descriptors.
//!
//! A [`GraphDef`] is the static half of a flattened graph: node types,
//! kinds, static attributes, and where leaves go. It never holds a leaf's
//! dynamic value, so two graphs that differ only in leaf values produce
//! equal descriptors (and equal digests).
//!
//! The descriptor is a flat table rather than a nested tree. Entries are
//! stored at their traversal index; an [`AttrDef`] names a child by index,
//! either as its first occurrence ([`AttrDef::Node`], [`AttrDef::Variable`])
//! or as a back-reference ([`AttrDef::NodeRef`], [`AttrDef::VariableRef`]).
use serde::{Deserialize, Serialize};

use crate::graph::NodeKind;
use crate::ident::{Hash, Index};
use crate::path::Key;
use crate::value::Static;
use crate::variable::VariableMeta;

const GRAPHDEF_DOMAIN: &[u8] = b"graphdef:v1:";

/// How one field of a node is rebuilt.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrDef {
    /// First occurrence of a child node, described at this index.
    Node(Index),
    /// Back-reference to a node already described earlier.
    NodeRef(Index),
    /// First occurrence of a variable, described at this index; its value
    /// comes from the flat state.
    Variable(Index),
    /// Back-reference to a variable already described earlier.
    VariableRef(Index),
    /// Raw leaf; its value comes from the flat state.
    Leaf,
    /// Static value embedded in the descriptor.
    Static(Static),
}

/// Description of one distinct node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Declared type name.
    pub type_name: String,
    /// Container shape.
    pub kind: NodeKind,
    /// Fields in declaration order.
    pub attributes: Vec<(Key, AttrDef)>,
}

/// One row of the descriptor table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Entry {
    /// A distinct node.
    Node(NodeSpec),
    /// A distinct variable's metadata.
    Variable(VariableMeta),
}

/// Immutable, hashable topology descriptor.
///
/// Serializes as its entry table. A deserialized descriptor is only checked
/// when it is merged; inconsistencies surface there as
/// [`crate::MismatchReason::MalformedDescriptor`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphDef {
    entries: Vec<Entry>,
}

impl GraphDef {
    pub(crate) const fn from_entries(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// All entries in traversal-index order; the root is at [`Index::ROOT`].
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entry at `index`.
    #[must_use]
    pub fn entry(&self, index: Index) -> Option<&Entry> {
        self.entries.get(index.position())
    }

    /// Root node description.
    #[must_use]
    pub fn root(&self) -> Option<&NodeSpec> {
        match self.entries.first() {
            Some(Entry::Node(spec)) => Some(spec),
            _ => None,
        }
    }

    /// Number of distinct nodes and variables described.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` for an empty table (never produced by flatten).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct nodes described.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Node(_)))
            .count()
    }

    /// Number of distinct variables described.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.entries.len() - self.node_count()
    }

    /// Canonical BLAKE3 digest of the descriptor.
    ///
    /// Layout: domain prefix, entry count, then per entry a tag byte and its
    /// fields; every length is little-endian `u64`. Stable across processes,
    /// suitable as a compilation-cache key.
    #[must_use]
    pub fn digest(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(GRAPHDEF_DOMAIN);
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            match entry {
                Entry::Node(spec) => {
                    hasher.update(&[0x01, spec.kind.tag()]);
                    hasher.update(&(spec.type_name.len() as u64).to_le_bytes());
                    hasher.update(spec.type_name.as_bytes());
                    hasher.update(&(spec.attributes.len() as u64).to_le_bytes());
                    for (key, attr) in &spec.attributes {
                        key.hash_into(&mut hasher);
                        hash_attr(&mut hasher, attr);
                    }
                }
                Entry::Variable(meta) => {
                    hasher.update(&[0x02]);
                    meta.hash_into(&mut hasher);
                }
            }
        }
        hasher.finalize().into()
    }

    /// Lowercase hex form of [`GraphDef::digest`].
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

fn hash_attr(hasher: &mut blake3::Hasher, attr: &AttrDef) {
    let (tag, index) = match attr {
        AttrDef::Node(i) => (1u8, Some(*i)),
        AttrDef::NodeRef(i) => (2, Some(*i)),
        AttrDef::Variable(i) => (3, Some(*i)),
        AttrDef::VariableRef(i) => (4, Some(*i)),
        AttrDef::Leaf => (5, None),
        AttrDef::Static(value) => {
            hasher.update(&[6]);
            value.hash_into(hasher);
            return;
        }
    };
    hasher.update(&[tag]);
    if let Some(index) = index {
        hasher.update(&index.0.to_le_bytes());
    }
}
