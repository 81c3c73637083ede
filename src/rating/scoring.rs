//! Album rating derived from per-track user ratings.
//!
//! K_i: Plex ratings live on a 0-10 scale (five stars, half-star steps).
//! B_i: Every track of the album has been rated → otherwise skip.
//!
//! The album rating starts from the average of the tracks that survive
//! filtering and is nudged by at most one point: up for excellent tracks
//! and an album without weak spots, down for weak tracks. It never drops
//! below the lowest track rating.

use crate::models::Track;

/// Tracks shorter than this are always ignored.
pub const MIN_DURATION_SECS: u64 = 30;

/// Tracks shorter than this are ignored when rated below `SHORT_TRACK_MIN_RATING`.
pub const SHORT_TRACK_SECS: u64 = 60;

pub const SHORT_TRACK_MIN_RATING: f64 = 3.0;

/// Albums with fewer tracks left after filtering are skipped.
pub const MIN_TRACKS: usize = 3;

/// Largest correction applied to the average, in either direction.
pub const MAX_ADJUSTMENT: f64 = 1.0;

/// Result of rating an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingOutcome {
    /// Calculated rating (half-up rounded, not clamped to the Plex scale)
    Rated(u8),
    /// No rating, with a human readable reason
    Skipped(String),
}

impl RatingOutcome {
    pub fn rating(&self) -> Option<u8> {
        match self {
            Self::Rated(r) => Some(*r),
            Self::Skipped(_) => None,
        }
    }
}

/// Average, lowest and highest rating over a set of tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackStats {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Drop interludes and skits: anything under 30s, and anything under
/// a minute rated below 3.
pub fn filter_tracks(tracks: &[Track]) -> Vec<Track> {
    tracks
        .iter()
        .filter(|t| {
            let rating = t.rating.unwrap_or(0.0);
            let short_and_weak =
                t.duration_secs < SHORT_TRACK_SECS && rating < SHORT_TRACK_MIN_RATING;
            !short_and_weak && t.duration_secs >= MIN_DURATION_SECS
        })
        .cloned()
        .collect()
}

/// Stats over the tracks that carry a rating. None when no track does.
pub fn track_stats(tracks: &[Track]) -> Option<TrackStats> {
    let ratings: Vec<f64> = tracks.iter().filter_map(|t| t.rating).collect();
    stats_of(&ratings)
}

fn stats_of(ratings: &[f64]) -> Option<TrackStats> {
    if ratings.is_empty() {
        return None;
    }
    let sum: f64 = ratings.iter().sum();
    let min = ratings.iter().copied().fold(f64::INFINITY, f64::min);
    let max = ratings.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(TrackStats {
        count: ratings.len(),
        avg: sum / ratings.len() as f64,
        min,
        max,
    })
}

/// Round to `decimals` places with ties going up.
///
/// Unlike `f64::round_ties_even`, 2.5 becomes 3 and 3.5 becomes 4.
pub fn round_half_up(n: f64, decimals: u32) -> f64 {
    let multiplier = 10f64.powi(decimals as i32);
    (n * multiplier + 0.5).floor() / multiplier
}

/// Signed correction to the filtered average, before clamping.
fn raw_adjustment(ratings: &[f64], stats: &TrackStats) -> f64 {
    let n = ratings.len() as f64;
    let share = |pred: fn(f64) -> bool| ratings.iter().filter(|r| pred(**r)).count() as f64 / n;

    let excellent = share(|r| r >= 9.0);
    let very_good = share(|r| (7.0..9.0).contains(&r));
    let below_average = share(|r| (4.0..6.0).contains(&r));
    let poor = share(|r| r < 4.0);

    let best_track_bonus = if stats.max >= 9.0 {
        0.7
    } else if stats.max >= 7.0 {
        0.3
    } else {
        0.0
    };

    let bad_track_penalty = if stats.min < 4.0 {
        1.5
    } else if stats.min < 6.0 {
        0.8
    } else {
        0.0
    };

    let no_bad_tracks_bonus = if stats.min >= 6.0 { 0.4 } else { 0.0 };

    excellent * 1.2 + very_good * 0.5 + best_track_bonus + no_bad_tracks_bonus
        - below_average * 0.8
        - poor * 1.8
        - bad_track_penalty
}

/// Calculate the album rating from its tracks.
///
/// B_i(all tracks rated) → otherwise `Skipped`
/// B_i(enough real tracks) → otherwise `Skipped`
pub fn calculate_album_rating(tracks: &[Track]) -> RatingOutcome {
    let Some(all) = track_stats(tracks) else {
        return RatingOutcome::Skipped("No rated tracks".to_string());
    };

    let unrated = tracks.iter().filter(|t| t.is_unrated()).count();
    if unrated > 0 {
        return RatingOutcome::Skipped(format!(
            "Has {unrated} unrated tracks (min: {:.1}, avg: {:.1})",
            all.min, all.avg
        ));
    }

    let filtered = filter_tracks(tracks);
    if filtered.len() < MIN_TRACKS {
        let removed = tracks.len() - filtered.len();
        let filter_info = if removed > 0 {
            format!(" ({removed} tracks filtered)")
        } else {
            String::new()
        };
        return RatingOutcome::Skipped(format!(
            "Too few tracks {} tracks{filter_info}: (min: {:.1}, avg: {:.1})",
            filtered.len(),
            all.min,
            all.avg
        ));
    }

    let ratings: Vec<f64> = filtered.iter().map(|t| t.rating.unwrap_or(0.0)).collect();
    // K_i: ratings is non-empty (MIN_TRACKS > 0)
    let Some(stats) = stats_of(&ratings) else {
        return RatingOutcome::Skipped("No rated tracks".to_string());
    };

    let adjustment = raw_adjustment(&ratings, &stats).clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT);
    let final_rating = stats.min.max(stats.avg + adjustment);

    RatingOutcome::Rated(round_half_up(final_rating, 0).max(0.0) as u8)
}
