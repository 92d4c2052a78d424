// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use crate::rng::RngKey;
use crate::value::Array;

const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// Stateful `xoroshiro128+` generator seeded from a derived [`RngKey`].
///
/// * Not cryptographically secure; use it for initializers and dropout masks.
/// * A key always yields the same sequence on every platform, so sampling
///   stays a pure function of `(seed, counter)` upstream.
#[derive(Debug, Clone, Copy)]
pub struct Prng {
    state: [u64; 2],
}

impl Prng {
    /// Seeds the generator from the first 16 bytes of `key`.
    #[must_use]
    pub fn from_key(key: &RngKey) -> Self {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&key.0[..8]);
        hi.copy_from_slice(&key.0[8..16]);
        Self::from_state(u64::from_le_bytes(lo), u64::from_le_bytes(hi))
    }

    /// Seeds the generator from one `u64` via SplitMix64 expansion.
    #[must_use]
    pub fn from_seed_u64(seed: u64) -> Self {
        fn splitmix64(state: &mut u64) -> u64 {
            *state = state.wrapping_add(GOLDEN_GAMMA);
            let mut z = *state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        }

        let mut sm = seed;
        let s0 = splitmix64(&mut sm);
        let s1 = splitmix64(&mut sm);
        Self::from_state(s0, s1)
    }

    const fn from_state(s0: u64, s1: u64) -> Self {
        // The all-zero state is a fixed point of xoroshiro.
        if s0 == 0 && s1 == 0 {
            return Self {
                state: [GOLDEN_GAMMA, 0],
            };
        }
        Self { state: [s0, s1] }
    }

    /// Next raw 64-bit output.
    pub const fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(55) ^ s1 ^ (s1 << 14);
        self.state[1] = s1.rotate_left(36);

        result
    }

    /// Next float in `[0, 1)` from the high 23 bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_f32(&mut self) -> f32 {
        let bits = ((self.next_u64() >> 41) as u32) | 0x3f80_0000;
        f32::from_bits(bits) - 1.0
    }

    /// Next double in `[0, 1)` from the high 52 bits.
    pub fn next_f64(&mut self) -> f64 {
        let bits = (self.next_u64() >> 12) | 0x3ff0_0000_0000_0000;
        f64::from_bits(bits) - 1.0
    }

    /// Next integer in `[0, bound)`, without modulo bias. Returns `0` for a
    /// zero bound.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound <= 1 {
            return 0;
        }
        if bound.is_power_of_two() {
            return self.next_u64() & (bound - 1);
        }
        let zone = u64::MAX - u64::MAX % bound;
        loop {
            let candidate = self.next_u64();
            if candidate < zone {
                return candidate % bound;
            }
        }
    }

    /// Array of `shape` with elements drawn uniformly from `[low, high)`.
    pub fn uniform(&mut self, shape: Vec<usize>, low: f32, high: f32) -> Array {
        let span = high - low;
        Array::full(shape, 0.0).map(|_| self.next_f32().mul_add(span, low))
    }
}
