//! Internal utilities: deterministic RNG and seed derivation.

mod det_rng;
pub mod entropy;

pub use det_rng::DetRng;
