//! Plex client module.

mod plex;
mod rate_limiter;

pub use plex::*;
pub use rate_limiter::*;
