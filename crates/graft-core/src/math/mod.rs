// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic sampling helpers driven by derived RNG keys.
//!
//! All sampling rounds to `f32` to match [`crate::Array`] storage.

mod prng;

pub use prng::Prng;
