//! Rating derivation.

mod scoring;

pub use scoring::*;
