//! Command-line interface.
//!
//! A single command: `scan-ports [HOST...]` scans every host, while
//! `--show-lists` and `--check-deps` print information and exit.

mod scan;

pub use scan::ScanCommand;

use clap::Parser;
use std::path::PathBuf;

/// scan-ports - Concurrent TCP port scanner with service detection.
///
/// Probes every requested port with a bounded TCP connect, then identifies
/// the service behind each open port. Detection is progressive: an
/// enhanced tier (HTTP client, TLS handshake) falls back to basic socket
/// probes and finally to a plain banner grab.
#[derive(Parser, Debug)]
#[command(name = "scan-ports")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Concurrent TCP port scanner with service detection", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub scan: ScanCommand,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to custom settings file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Log filter directive implied by `-v`/`-q`.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable plain text
    #[default]
    Plain,
    /// JSON structured output
    Json,
    /// CSV format for data analysis
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionTier;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["scan-ports"]).unwrap();
        assert_eq!(cli.scan.hosts, vec!["localhost".to_string()]);
        assert_eq!(cli.scan.output, OutputFormat::Plain);
        assert!(cli.scan.ports.is_none());
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_full_invocation() {
        let cli = Cli::try_parse_from([
            "scan-ports",
            "10.0.0.1",
            "db.internal",
            "-l",
            "web,database",
            "--tier",
            "basic",
            "--deadline",
            "30",
            "--retries",
            "2",
            "-o",
            "json",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.scan.hosts, vec!["10.0.0.1", "db.internal"]);
        assert_eq!(cli.scan.lists, vec!["web", "database"]);
        assert_eq!(cli.scan.tier, Some(DetectionTier::Basic));
        assert_eq!(cli.scan.deadline, Some(30));
        assert_eq!(cli.scan.retries, 2);
        assert_eq!(cli.scan.output, OutputFormat::Json);
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_ports_and_lists_conflict() {
        assert!(Cli::try_parse_from(["scan-ports", "-p", "80", "-l", "web"]).is_err());
    }

    #[test]
    fn test_fast_conflicts_with_timeout() {
        assert!(Cli::try_parse_from(["scan-ports", "--fast", "-t", "500"]).is_err());
    }
}
