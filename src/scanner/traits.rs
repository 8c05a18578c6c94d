//! Result model and the prober abstraction.
//!
//! Everything the coordinator hands to a renderer lives here, along with
//! the `Prober` trait that lets the coordinator run against real sockets
//! or an instrumented stand-in.

use crate::config::DetectionTier;
use crate::types::Port;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// State of a scanned port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    /// Connect succeeded.
    Open,
    /// Connect was explicitly refused.
    Closed,
    /// No answer within the timeout, or the attempt could not be made.
    Filtered,
    /// Never dispatched because the scan was halted first.
    NotScanned,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Filtered => write!(f, "filtered"),
            Self::NotScanned => write!(f, "not scanned"),
        }
    }
}

/// How sure a detector is about its identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Best-effort identification of the service behind an open port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name, e.g. "HTTP", "SSH", "Redis".
    pub name: String,
    pub confidence: Confidence,
    /// Tier of the code path that produced this identification.
    pub method: DetectionTier,
    /// Version string, when the service advertises one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Sanitized first bytes from the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    /// Protocol-specific facts (HTTP status, server header, TLS subject...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, String>,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, confidence: Confidence, method: DetectionTier) -> Self {
        Self {
            name: name.into(),
            confidence,
            method,
            version: None,
            banner: None,
            detail: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_banner(mut self, banner: Option<String>) -> Self {
        self.banner = banner;
        self
    }

    /// Record a detail entry; `None` values are skipped.
    pub fn with_detail<V: ToString>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.detail.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// Result of scanning a single port.
///
/// Constructors enforce that only open ports ever carry a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortResult {
    pub port: Port,
    pub state: PortState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceInfo>,
    /// Service the port is conventionally or list-assigned to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Wall time of connect plus detection.
    #[serde(rename = "probe_duration_ms", with = "duration_ms")]
    pub probe_duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PortResult {
    fn new(port: Port, state: PortState, probe_duration: Duration) -> Self {
        Self {
            port,
            state,
            service: None,
            expected: None,
            probe_duration,
            note: None,
        }
    }

    pub fn open(port: Port, probe_duration: Duration) -> Self {
        Self::new(port, PortState::Open, probe_duration)
    }

    pub fn closed(port: Port, probe_duration: Duration) -> Self {
        Self::new(port, PortState::Closed, probe_duration)
    }

    pub fn filtered(port: Port, probe_duration: Duration) -> Self {
        Self::new(port, PortState::Filtered, probe_duration)
    }

    pub fn not_scanned(port: Port) -> Self {
        Self::new(port, PortState::NotScanned, Duration::ZERO)
    }

    /// Attach a detected service. Ignored unless the port is open.
    pub fn with_service(mut self, service: Option<ServiceInfo>) -> Self {
        if self.state == PortState::Open {
            self.service = service;
        }
        self
    }

    pub fn with_expected(mut self, expected: Option<String>) -> Self {
        self.expected = expected;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// The ordered outcome of scanning one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Host string as given by the caller.
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Tier the scan actually ran at.
    pub tier: DetectionTier,
    pub show_closed: bool,
    /// The scan was cancelled or hit its global deadline.
    pub interrupted: bool,
    /// Resolution failure for this target, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// One entry per requested port, ascending by port number.
    pub results: Vec<PortResult>,
}

impl ScanReport {
    /// A report standing in for a target that could not be resolved.
    pub fn unresolved(
        target: impl Into<String>,
        tier: DetectionTier,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            target: target.into(),
            address: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            tier,
            show_closed: false,
            interrupted: false,
            error: Some(error.to_string()),
            results: Vec::new(),
        }
    }

    /// Results a renderer should list, honoring `show_closed`.
    pub fn visible(&self) -> impl Iterator<Item = &PortResult> {
        let show_closed = self.show_closed;
        self.results
            .iter()
            .filter(move |r| show_closed || r.state != PortState::Closed)
    }

    fn count(&self, state: PortState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }

    pub fn open_count(&self) -> usize {
        self.count(PortState::Open)
    }

    pub fn closed_count(&self) -> usize {
        self.count(PortState::Closed)
    }

    pub fn filtered_count(&self) -> usize {
        self.count(PortState::Filtered)
    }

    pub fn not_scanned_count(&self) -> usize {
        self.count(PortState::NotScanned)
    }

    /// One-line summary of the scan.
    pub fn summary(&self) -> String {
        match &self.error {
            Some(err) => format!("{} - {}", self.target, err),
            None => format!(
                "{} - {} open, {} closed, {} filtered, {} not scanned [{:.2}s]",
                self.target,
                self.open_count(),
                self.closed_count(),
                self.filtered_count(),
                self.not_scanned_count(),
                self.duration.as_secs_f64()
            ),
        }
    }
}

/// What a single connect attempt concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Open,
    Closed,
    Filtered,
    /// The local host could not open another socket; worth one retry.
    Exhausted(String),
}

/// Determines the state of one port with a bounded connect.
///
/// Implementations must release any socket they open before returning.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> ProbeOutcome;
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(n: u16) -> Port {
        Port::new(n).unwrap()
    }

    #[test]
    fn test_port_state_display() {
        assert_eq!(PortState::Open.to_string(), "open");
        assert_eq!(PortState::Closed.to_string(), "closed");
        assert_eq!(PortState::Filtered.to_string(), "filtered");
        assert_eq!(PortState::NotScanned.to_string(), "not scanned");
    }

    #[test]
    fn test_closed_port_never_carries_service() {
        let info = ServiceInfo::new("HTTP", Confidence::High, DetectionTier::Enhanced);
        let closed = PortResult::closed(port(80), Duration::ZERO).with_service(Some(info.clone()));
        assert!(closed.service.is_none());

        let open = PortResult::open(port(80), Duration::ZERO).with_service(Some(info));
        assert_eq!(open.service.unwrap().name, "HTTP");
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn test_report_visibility_and_counts() {
        let mut report = ScanReport::unresolved("host", DetectionTier::Basic, "x");
        report.error = None;
        report.results = vec![
            PortResult::closed(port(22), Duration::ZERO),
            PortResult::open(port(80), Duration::ZERO),
            PortResult::not_scanned(port(81)),
        ];
        assert_eq!(report.visible().count(), 2);
        report.show_closed = true;
        assert_eq!(report.visible().count(), 3);
        assert_eq!(report.open_count(), 1);
        assert_eq!(report.not_scanned_count(), 1);
        assert!(report.summary().contains("1 open, 1 closed, 0 filtered, 1 not scanned"));
    }

    #[test]
    fn test_result_serialization() {
        let info = ServiceInfo::new("SSH", Confidence::High, DetectionTier::Enhanced)
            .with_detail("software", Some("OpenSSH_9.6"))
            .with_detail::<String>("comments", None);
        let result = PortResult::open(port(22), Duration::from_millis(12)).with_service(Some(info));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["port"], 22);
        assert_eq!(json["state"], "open");
        assert_eq!(json["probe_duration_ms"], 12);
        assert_eq!(json["service"]["confidence"], "high");
        assert_eq!(json["service"]["detail"]["software"], "OpenSSH_9.6");
        assert!(json["service"]["detail"].get("comments").is_none());
    }
}
