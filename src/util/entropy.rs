//! Process-local seed sequence for decorrelated default shuffles.
//!
//! Each call to [`next_seed`] returns a fresh seed drawn from a global
//! counter passed through a splitmix64 finalizer. The sequence is
//! reproducible within a process run (no OS entropy involved), yet
//! consecutive seeds are fully decorrelated, which is what the select
//! shuffle needs when the caller does not pin a seed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Weyl increment used by splitmix64.
const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

static SEED_COUNTER: AtomicU64 = AtomicU64::new(0x5eed_0000_0000_0001);

/// splitmix64 finalizer: full-avalanche mixing of a 64-bit value.
#[must_use]
pub const fn mix_seed(mut seed: u64) -> u64 {
    seed ^= seed >> 30;
    seed = seed.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    seed ^= seed >> 27;
    seed = seed.wrapping_mul(0x94d0_49bb_1331_11eb);
    seed ^= seed >> 31;
    seed
}

/// Returns the next seed in the process-local sequence.
#[must_use]
pub fn next_seed() -> u64 {
    mix_seed(SEED_COUNTER.fetch_add(GOLDEN_GAMMA, Ordering::Relaxed))
}
