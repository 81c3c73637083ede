//! CSV report of an album ratings run.
//!
//! One row per album, library order. Absent values are empty cells.

use crate::models::{AlbumResult, PlexkitError, Result, RunMode};
use chrono::{DateTime, TimeZone};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const HEADER: [&str; 8] = [
    "Artist",
    "Album",
    "Rating",
    "Status",
    "Rating Adjustment",
    "Avg Rating",
    "Lowest Track",
    "Highest Track",
];

const REASON_HEADER: &str = "Reason";

/// File name for a report, e.g. `plex_album_ratings_preview_20240131_235959.csv`.
pub fn report_filename<Tz: TimeZone>(mode: RunMode, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "plex_album_ratings_{}_{}.csv",
        mode.as_str(),
        now.format("%Y%m%d_%H%M%S")
    )
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write results as CSV.
///
/// The Reason column is only present when some row has a reason.
pub fn write_results<W: Write>(writer: W, results: &[AlbumResult]) -> Result<()> {
    let with_reason = results.iter().any(|r| r.reason.is_some());
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = HEADER.to_vec();
    if with_reason {
        header.push(REASON_HEADER);
    }
    wtr.write_record(&header)?;

    for r in results {
        let mut record = vec![
            r.artist.clone(),
            r.album.clone(),
            cell(r.rating),
            r.status.to_string(),
            cell(r.rating_adjustment),
            cell(r.avg_rating),
            cell(r.lowest_track),
            cell(r.highest_track),
        ];
        if with_reason {
            record.push(r.reason.clone().unwrap_or_default());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()
        .map_err(|e| PlexkitError::io("flushing CSV report", e))
}

/// Write results to a CSV file, creating the parent directory if needed.
pub fn write_csv(path: &Path, results: &[AlbumResult]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| PlexkitError::io("creating report directory", e))?;
    }
    let file = File::create(path).map_err(|e| PlexkitError::io("creating CSV report", e))?;
    write_results(file, results)
}
