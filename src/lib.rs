//! plexkit - Misc tools for managing Plex.
//!
//! ## Tools
//!
//! - **Album ratings**: derive a rating for every unrated album of a music
//!   library from its track ratings, preview it or write it back to Plex,
//!   and report every decision as CSV.
//!
//! ## Layout
//!
//! - `client`: Plex Media Server API with pacing and retries
//! - `rating`: the scoring algorithm
//! - `pipeline`: library-wide runs
//! - `report`: CSV output and summaries

pub mod client;
pub mod models;
pub mod pipeline;
pub mod rating;
pub mod report;

// Re-exports for convenience
pub use client::{PlexClient, RateLimiter};
pub use models::{
    Album, AlbumResult, Config, ConfigError, PlexkitError, Result, RunMode, RunStats, Status,
    Track,
};
pub use pipeline::{AlbumRatingPipeline, RunOutput};
pub use rating::{RatingOutcome, calculate_album_rating};
