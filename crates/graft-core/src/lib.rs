// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! graft-core: state extraction and reconstruction for mutable object graphs.
//!
//! Models are built as ordinary mutable graphs in a [`Graph`] arena. The
//! flattener turns the graph reachable from a root into a static
//! [`GraphDef`] plus an ordered [`FlatState`]; the unflattener rebuilds an
//! equivalent graph, restoring shared references and cycles. [`Filter`]s
//! partition state into groups, [`Graph::update`] writes state back in place,
//! and [`Rngs`] keeps deterministic random streams inside the same state
//! model.
//!
//! ```
//! use graft_core::{split, merge, Graph, Variable};
//!
//! let mut graph = Graph::new();
//! let root = graph.object("Linear");
//! let kernel = graph.add_variable(Variable::param(0.5));
//! graph.set(root, "kernel", kernel)?;
//!
//! let (def, state) = split(&graph, root)?;
//! let (copy, copy_root) = merge(&def, [state])?;
//! assert_eq!(graft_core::graphdef(&copy, copy_root)?, def);
//! # Ok::<(), graft_core::GraftError>(())
//! ```
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

/// Deterministic sampling (PRNG seeded from derived keys).
pub mod math;

mod api;
mod config;
mod error;
mod filter;
mod flatten;
mod graph;
mod graphdef;
mod ident;
mod path;
mod rng;
mod state;
mod unflatten;
mod update;
mod value;
mod variable;

// Re-exports for stable public API
/// Client entry points composing flatten, merge, and filters.
pub use api::{
    clone_graph, graphdef, iter_graph, merge, pop, split, split_by, state, state_by, update,
};
/// Engine configuration and its error type.
pub use config::{ConfigError, GraftConfig, DEFAULT_STREAM};
/// Error taxonomy.
pub use error::{GraftError, MismatchReason, Result};
/// Declarative filters and partition modes.
pub use filter::{Filter, PartitionMode, Predicate};
/// Graph flattener.
pub use flatten::flatten;
/// Arena, nodes, and slots.
pub use graph::{Graph, Node, NodeKind, Slot};
/// Topology descriptors.
pub use graphdef::{AttrDef, Entry, GraphDef, NodeSpec};
/// Handles, traversal indices, and the identity registry.
pub use ident::{
    Hash, IdentityRegistry, Index, NodeRef, ObjectRef, Registration, VarRef, MAX_OBJECTS,
};
/// Keys and paths.
pub use path::{Key, Path};
/// RNG streams and key material.
pub use rng::{RngKey, RngStream, Rngs, StreamState, RNGS_TYPE, STREAM_TYPE};
/// Flat and hierarchical state.
pub use state::{FlatState, Leaves, State, StateLeaf, StateNode};
/// Graph unflattener.
pub use unflatten::unflatten;
/// Leaf and static values.
pub use value::{Array, ShapeError, Static, Value};
/// Variables and type tags.
pub use variable::{
    register_variable_type, variable_type_from_name, VarType, Variable, VariableMeta, BATCH_STAT,
    CACHE, INTERMEDIATE, PARAM, PERTURBATION, RNG_COUNT, RNG_KEY, RNG_STATE,
};
