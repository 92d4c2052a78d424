// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Proptest runners with pinned seeds.
//!
//! To try a different seed locally, set `PROPTEST_SEED` or edit
//! [`SEED_BYTES`]; committed tests always use the pinned value so failures
//! reproduce across machines and CI.

use proptest::test_runner::{Config as PropConfig, RngAlgorithm, TestRng, TestRunner};

/// Seed shared by Graft property tests.
pub const SEED_BYTES: [u8; 32] = [
    0x47, 0x52, 0x41, 0x46, 0x54, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0,
];

/// Runner over a ChaCha RNG seeded with [`SEED_BYTES`], running `cases` cases.
pub fn pinned_runner(cases: u32) -> TestRunner {
    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    TestRunner::new_with_rng(
        PropConfig {
            cases,
            ..PropConfig::default()
        },
        rng,
    )
}
