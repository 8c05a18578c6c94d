//! Port types with validation and parsing.
//!
//! `Port` is always a valid port number (1-65535). `PortRange` and
//! `PortSpec` expand explicit ports, ranges, and named port lists into the
//! deduplicated set a scan walks.

use crate::config::PortList;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A validated network port number (1-65535).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Minimum valid port number.
    pub const MIN: u16 = 1;
    /// Maximum valid port number.
    pub const MAX: u16 = 65535;

    /// Create a new Port from a u16, returning None if invalid.
    #[inline]
    pub const fn new(port: u16) -> Option<Self> {
        if port >= Self::MIN {
            Some(Self(port))
        } else {
            None
        }
    }

    /// Get the raw port number.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = PortError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(PortError::OutOfRange(u32::from(value)))
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Error type for port parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("port {0} is out of valid range (1-65535)")]
    OutOfRange(u32),
    #[error("invalid port number: {0}")]
    InvalidFormat(String),
    #[error("invalid port range: start ({0}) > end ({1})")]
    InvalidRange(u16, u16),
    #[error("empty port specification")]
    Empty,
}

/// A range of ports (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    start: Port,
    end: Port,
}

impl PortRange {
    /// Create a new port range.
    pub fn new(start: Port, end: Port) -> Result<Self, PortError> {
        if start > end {
            Err(PortError::InvalidRange(start.0, end.0))
        } else {
            Ok(Self { start, end })
        }
    }

    /// Create a range containing a single port.
    pub const fn single(port: Port) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// Number of ports in this range.
    pub const fn len(&self) -> usize {
        (self.end.0 - self.start.0) as usize + 1
    }

    /// A valid range always holds at least one port.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over all ports in this range.
    pub fn iter(&self) -> impl Iterator<Item = Port> {
        (self.start.0..=self.end.0).map(Port)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A complete port specification.
///
/// Supports formats like:
/// - Single port: "80"
/// - Comma-separated: "80,443,8080"
/// - Range: "1-1000"
/// - Mixed: "22,80,443,8000-9000"
///
/// Ports that came from a named list keep the list's service label, which
/// renderers show as the "expected" service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    ranges: Vec<PortRange>,
    labels: BTreeMap<Port, String>,
}

impl PortSpec {
    /// Create an empty port specification.
    pub const fn new() -> Self {
        Self {
            ranges: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Add a port range to the specification.
    pub fn add_range(&mut self, range: PortRange) {
        self.ranges.push(range);
    }

    /// Add a single port to the specification.
    pub fn add_port(&mut self, port: Port) {
        self.ranges.push(PortRange::single(port));
    }

    /// Add a port with an expected-service label. The first label wins.
    pub fn add_labeled(&mut self, port: Port, label: impl Into<String>) {
        self.add_port(port);
        self.labels.entry(port).or_insert_with(|| label.into());
    }

    /// Build a specification from named port lists.
    ///
    /// The name `all` (case-insensitive) selects every list. Names are
    /// matched case-insensitively; the first unknown name is returned as
    /// an error.
    pub fn from_lists<S: AsRef<str>>(
        names: &[S],
        lists: &BTreeMap<String, PortList>,
    ) -> Result<Self, UnknownList> {
        let mut spec = Self::new();
        let wants_all = names
            .iter()
            .any(|n| n.as_ref().trim().eq_ignore_ascii_case("all"));

        let selected: Vec<&PortList> = if wants_all {
            lists.values().collect()
        } else {
            names
                .iter()
                .map(|name| {
                    let name = name.as_ref().trim().to_lowercase();
                    lists.get(&name).ok_or_else(|| UnknownList {
                        name,
                        available: lists.keys().cloned().collect(),
                    })
                })
                .collect::<Result<_, _>>()?
        };

        for list in selected {
            for (&port, label) in &list.ports {
                spec.add_labeled(port, label.clone());
            }
        }
        Ok(spec)
    }

    /// All ports as a sorted, deduplicated vector.
    pub fn to_ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self.ranges.iter().flat_map(|r| r.iter()).collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    /// Expected-service label for a port, if it came from a named list.
    pub fn label(&self, port: Port) -> Option<&str> {
        self.labels.get(&port).map(String::as_str)
    }

    /// Total number of unique ports.
    pub fn count(&self) -> usize {
        self.to_ports().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// A named port list that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownList {
    pub name: String,
    pub available: Vec<String>,
}

impl FromStr for PortSpec {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PortError::Empty);
        }

        let mut spec = Self::new();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((lo, hi)) = part.split_once('-') {
                let start = parse_port(lo)?;
                let end = parse_port(hi)?;
                spec.add_range(PortRange::new(start, end)?);
            } else {
                spec.add_port(parse_port(part)?);
            }
        }

        if spec.is_empty() {
            return Err(PortError::Empty);
        }

        Ok(spec)
    }
}

fn parse_port(raw: &str) -> Result<Port, PortError> {
    let raw = raw.trim();
    let value: u32 = raw
        .parse()
        .map_err(|_| PortError::InvalidFormat(raw.to_string()))?;
    u16::try_from(value)
        .ok()
        .and_then(Port::new)
        .ok_or(PortError::OutOfRange(value))
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}
