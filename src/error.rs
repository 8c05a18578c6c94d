//! Error types for scan-ports.
//!
//! Uses `thiserror` for ergonomic error definitions. Only configuration and
//! resolution failures ever leave the library; per-port outcomes (closed,
//! filtered, detector trouble) are folded into the result model instead.

use crate::types::{PortError, ResolutionError, UnknownList};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid scan parameters. Fatal, raised before any probing starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("concurrency {requested} exceeds the maximum of {max}")]
    ConcurrencyTooHigh { requested: usize, max: usize },

    #[error(
        "detection timeout {detect:?} must be non-zero and no larger than the connection timeout {connect:?}"
    )]
    InvalidDetectTimeout { detect: Duration, connect: Duration },

    #[error("global deadline must be greater than zero")]
    ZeroDeadline,

    #[error("global deadline {0:?} is too far in the future")]
    DeadlineTooFar(Duration),

    #[error("no ports to scan")]
    EmptyPortSet,

    #[error("invalid port specification: {0}")]
    Ports(#[from] PortError),

    #[error("port list '{name}' not found (available: {})", .available.join(", "))]
    UnknownPortList { name: String, available: Vec<String> },

    #[error("could not determine a configuration directory")]
    DirectoryNotFound,

    #[error("failed to read settings from {}: {reason}", .path.display())]
    ReadFailed { path: PathBuf, reason: String },

    #[error("invalid settings format: {0}")]
    InvalidFormat(String),
}

impl From<UnknownList> for ConfigError {
    fn from(err: UnknownList) -> Self {
        Self::UnknownPortList {
            name: err.name,
            available: err.available,
        }
    }
}

/// Failure inside a single service detector.
///
/// Never escapes the detection layer: the registry turns it into a tier
/// fallback or an "open, service unknown" result.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("detector timed out")]
    Timeout,

    #[error("no response from service")]
    Silent,

    #[error("HTTP probe failed: {0}")]
    Http(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Top-level error for scan invocations.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for detector internals.
pub type DetectResult<T> = Result<T, DetectError>;

/// Result type alias for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_list_message() {
        let err: ConfigError = UnknownList {
            name: "games".to_string(),
            available: vec!["web".to_string(), "database".to_string()],
        }
        .into();
        assert_eq!(
            err.to_string(),
            "port list 'games' not found (available: web, database)"
        );
    }

    #[test]
    fn test_port_error_converts() {
        let err: ScanError = ConfigError::from(PortError::Empty).into();
        assert!(matches!(err, ScanError::Config(ConfigError::Ports(PortError::Empty))));
    }
}
