//! Library and result types for plexkit.
//!
//! K_i: These types represent the data flowing from Plex through scoring
//! into the report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An album in the Plex music library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    /// Plex ratingKey
    pub key: String,

    /// Album title
    pub title: String,

    /// Album artist (Plex parentTitle)
    pub artist: String,

    /// Existing user rating on the 0-10 scale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<f64>,
}

/// A track belonging to an album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,

    /// User rating on the 0-10 scale
    pub rating: Option<f64>,

    /// Duration in whole seconds (0 when Plex reports none)
    pub duration_secs: u64,
}

impl Track {
    pub fn new(title: impl Into<String>, rating: Option<f64>, duration_secs: u64) -> Self {
        Self {
            title: title.into(),
            rating,
            duration_secs,
        }
    }

    /// A track counts as unrated when it has no rating or a zero rating.
    pub fn is_unrated(&self) -> bool {
        self.rating.is_none_or(|r| r == 0.0)
    }
}

/// Whether ratings are only calculated or also written back to Plex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Preview,
    Update,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preview" | "p" => Ok(Self::Preview),
            "update" | "u" => Ok(Self::Update),
            other => Err(format!(
                "invalid mode '{other}': expected 'preview' (p) or 'update' (u)"
            )),
        }
    }
}

/// Outcome of processing a single album.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Rating calculated, not written
    Preview,
    /// Rating written to Plex
    Success,
    /// Writing the rating or fetching tracks failed
    Failed,
    /// No rating calculated
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "Preview",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the album ratings report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumResult {
    pub artist: String,
    pub album: String,
    pub rating: Option<u8>,
    pub status: Status,
    /// Distance between the final rating and the filtered average
    pub rating_adjustment: Option<f64>,
    pub avg_rating: Option<f64>,
    pub lowest_track: Option<f64>,
    pub highest_track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AlbumResult {
    /// Base row for an album. Status follows the rating: Preview when rated,
    /// Skipped otherwise.
    pub fn new(album: &Album, rating: Option<u8>, reason: Option<String>) -> Self {
        Self {
            artist: album.artist.clone(),
            album: album.title.clone(),
            rating,
            status: if rating.is_some() {
                Status::Preview
            } else {
                Status::Skipped
            },
            rating_adjustment: None,
            avg_rating: None,
            lowest_track: None,
            highest_track: None,
            reason,
        }
    }

    /// Row for an album whose processing failed.
    pub fn failed(album: &Album, reason: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            ..Self::new(album, None, Some(reason.into()))
        }
    }
}

/// Statistics for an album ratings run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_albums: usize,
    pub previewed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub runtime_secs: f64,
}

impl RunStats {
    /// Count a finished album.
    pub fn record(&mut self, status: Status) {
        match status {
            Status::Preview => self.previewed += 1,
            Status::Success => self.updated += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
        }
    }

    /// Albums that received a rating, written or not.
    pub fn processed(&self) -> usize {
        self.previewed + self.updated
    }

    /// Albums counted so far.
    pub fn completed(&self) -> usize {
        self.previewed + self.updated + self.skipped + self.failed
    }
}
