//! Run reports: the CSV file and the printed summary.

mod csv_report;
mod summary;

pub use csv_report::*;
pub use summary::*;
