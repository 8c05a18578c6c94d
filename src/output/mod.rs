//! Output formatting module.
//!
//! Provides renderers for plain text, JSON, and CSV output of scan reports.
//! Renderers write to any `io::Write`; only the `print_*` helpers touch
//! stdout and stderr directly.

mod csv_format;
mod json_format;
mod plain;

pub use csv_format::write_csv;
pub use json_format::write_json;
pub use plain::{
    print_capabilities, print_error, print_port_lists, print_warning, write_plain,
};

use crate::cli::OutputFormat;
use crate::scanner::ScanReport;
use std::io::{self, Write};

/// Render reports in the requested format.
pub fn write_reports<W: Write>(
    out: W,
    reports: &[ScanReport],
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Plain => write_plain(out, reports),
        OutputFormat::Json => write_json(out, reports),
        OutputFormat::Csv => write_csv(out, reports),
    }
}

/// Render reports to stdout.
pub fn print_reports(reports: &[ScanReport], format: OutputFormat) -> io::Result<()> {
    let stdout = io::stdout();
    write_reports(stdout.lock(), reports, format)
}
