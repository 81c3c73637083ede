//! Core data models for plexkit.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants with retry strategies

mod album;
mod config;
mod error;

pub use album::*;
pub use config::*;
pub use error::*;
