// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine error taxonomy.
//!
//! Every failure here is structural or logical, never transient: nothing is
//! retried and nothing is swallowed. Variants carry the offending path or
//! handle so callers can decide on recovery (for example, treating
//! [`GraftError::PathNotFound`] as "this checkpoint needs a migration").
use thiserror::Error;

use crate::ident::{Index, NodeRef, VarRef};
use crate::path::{Key, Path};

/// Why a flat state disagrees with a descriptor during unflatten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// The descriptor expects a leaf the flat state does not provide.
    Missing,
    /// The flat state carries an entry no leaf marker describes.
    Unexpected,
    /// A raw leaf marker received a variable snapshot.
    ExpectedRawLeaf,
    /// The descriptor itself is inconsistent (an index names the wrong kind of entry).
    MalformedDescriptor,
}

impl core::fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing entry",
            Self::Unexpected => "unexpected entry",
            Self::ExpectedRawLeaf => "expected a raw leaf, found a variable",
            Self::MalformedDescriptor => "malformed descriptor",
        })
    }
}

/// Errors emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraftError {
    /// Flat state shape disagrees with the topology descriptor.
    #[error("structure mismatch at {path}: {reason}")]
    StructureMismatch {
        /// Path of the offending entry.
        path: Path,
        /// What disagreed.
        reason: MismatchReason,
    },
    /// An update targeted a path that does not exist in the live graph.
    #[error("path not found: {path}")]
    PathNotFound {
        /// Incoming path.
        path: Path,
    },
    /// An update's leaf type disagrees with the live slot.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Incoming path.
        path: Path,
        /// Type tag of the live slot (`"raw leaf"` for unwrapped slots).
        expected: &'static str,
        /// Type tag of the incoming leaf.
        found: &'static str,
    },
    /// An update tried to change the value of a read-only variable.
    #[error("variable at {path} is not mutable")]
    ImmutableVariable {
        /// Incoming path.
        path: Path,
    },
    /// A partition found no filter matching an entry.
    #[error("no filter matched entry at {path}")]
    UnmatchedEntry {
        /// Path of the unmatched entry.
        path: Path,
    },
    /// A back-reference named an index that was never constructed.
    #[error("back-reference to unregistered index {index}")]
    CycleWithoutIdentity {
        /// Offending traversal index.
        index: Index,
    },
    /// A node handle does not belong to this arena.
    #[error("unknown node handle: {0:?}")]
    UnknownNode(NodeRef),
    /// A variable handle does not belong to this arena.
    #[error("unknown variable handle: {0:?}")]
    UnknownVariable(VarRef),
    /// Direct write to a read-only variable.
    #[error("variable {0:?} is frozen")]
    FrozenVariable(VarRef),
    /// A key does not fit the node kind (e.g. a name on a list).
    #[error("key {key} is not valid for node {node:?}")]
    InvalidKey {
        /// Target node.
        node: NodeRef,
        /// Rejected key.
        key: Key,
    },
    /// No stream with this name and no default stream to fall back on.
    #[error("unknown rng stream: {0}")]
    UnknownStream(String),
    /// A variable type name is already registered with another lineage.
    #[error("variable type name {0} is already registered with a different lineage")]
    VariableTypeConflict(&'static str),
    /// A node reached through RNG helpers is not shaped like an RNG stream.
    #[error("malformed rng stream at {path}")]
    MalformedStream {
        /// Field that is missing or has the wrong kind.
        path: Path,
    },
}

/// Shorthand result type for engine operations.
pub type Result<T, E = GraftError> = core::result::Result<T, E>;
