//! Batch pipelines over the Plex library.

mod album_ratings;

pub use album_ratings::*;
