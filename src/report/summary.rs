//! End-of-run summary.

use crate::models::{RunMode, RunStats};

/// Summary lines for the terminal.
pub fn summary_lines(stats: &RunStats, mode: RunMode) -> Vec<String> {
    let mut lines = vec![
        "Summary:".to_string(),
        format!("Total albums processed: {}", stats.total_albums),
    ];

    match mode {
        RunMode::Update => {
            lines.push(format!("Successfully updated: {}", stats.updated));
            lines.push(format!("Skipped: {}", stats.skipped));
            lines.push(format!("Failed: {}", stats.failed));
        }
        RunMode::Preview => {
            lines.push(format!("Ratings calculated: {}", stats.previewed));
            lines.push(format!("Skipped: {}", stats.skipped));
            // Preview runs only fail on unreachable tracks
            if stats.failed > 0 {
                lines.push(format!("Failed: {}", stats.failed));
            }
        }
    }

    lines
}
