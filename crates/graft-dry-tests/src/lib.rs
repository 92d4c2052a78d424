// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Graft crates.
#![forbid(unsafe_code)]
//!
//! This crate provides commonly used model graphs, random graph recipes,
//! and test harness setup so Graft test suites do not rebuild them by hand.
//!
//! # Modules
//!
//! - [`models`] - Small model graphs (linear, MLP with a tied layer, batch norm, cycles)
//! - [`random`] - Proptest strategies producing graphs with sharing and cycles
//! - [`logging`] - One-shot `tracing` subscriber for test output
//! - [`runner`] - Proptest runners with pinned seeds

pub mod logging;
pub mod models;
pub mod random;
pub mod runner;

// Re-export commonly used items at crate root for convenience
pub use logging::init_tracing;
pub use models::{
    batch_norm, cyclic_pair, linear, mlp_with_shared_layer, shared_leaf_pair, SharedLeafPair,
    TiedMlp, SPECIAL_PARAM,
};
pub use random::{arb_graph_ops, build_graph, GraphOp};
pub use runner::{pinned_runner, SEED_BYTES};
