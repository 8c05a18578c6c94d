//! Service detection for open ports.
//!
//! Each detector speaks one protocol family and carries both a rich
//! (`enhanced`) and a minimal (`basic`) code path, chosen by the tier it was
//! built with. The [`DetectorRegistry`] maps ports to detectors and always
//! ends in the protocol-agnostic banner grab.
//!
//! Detectors open their own short-lived connections: the socket used to
//! decide that a port is open has already been released by then.

mod banner;
mod database;
mod http;
mod ssh;
mod tls;

pub use banner::{identify_banner, sanitize_banner, BannerDetector};
pub use database::DatabaseDetector;
pub use http::HttpDetector;
pub use ssh::SshDetector;
pub use tls::TlsDetector;

use crate::config::DetectionTier;
use crate::error::{DetectError, DetectResult};
use crate::scanner::traits::ServiceInfo;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Ports answered by the HTTP detector.
pub const HTTP_PORTS: &[u16] = &[
    80, 443, 3000, 4000, 5000, 8000, 8008, 8080, 8081, 8443, 8888, 9000,
];

/// HTTP ports where HTTPS is tried first.
pub const HTTPS_PORTS: &[u16] = &[443, 8443];

/// Implicit-TLS service ports.
pub const TLS_PORTS: &[u16] = &[465, 636, 993, 995, 5061, 8883];

/// Database and data store ports.
pub const DATABASE_PORTS: &[u16] = &[
    1433, 1521, 3306, 5432, 5984, 6379, 8086, 9042, 9200, 11211, 27017,
];

/// Everything a detector needs to reach the service.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub addr: SocketAddr,
    /// Name for `Host` headers and SNI.
    pub server_name: String,
    /// Budget for one detection stage.
    pub timeout: Duration,
}

impl ProbeContext {
    pub fn new(addr: SocketAddr, server_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr,
            server_name: server_name.into(),
            timeout,
        }
    }

    /// Whether `server_name` is just the literal address.
    pub fn is_literal_address(&self) -> bool {
        self.server_name == self.addr.ip().to_string()
    }
}

/// A protocol-specific service probe.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// How many `ProbeContext::timeout` budgets one call may use.
    fn stages(&self) -> u32 {
        2
    }

    /// Identify the service at `ctx.addr`.
    async fn detect(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo>;
}

/// Which ports a registry entry claims.
#[derive(Debug, Clone)]
pub enum PortMatcher {
    Port(u16),
    Ports(Vec<u16>),
    Range(RangeInclusive<u16>),
}

impl PortMatcher {
    pub fn matches(&self, port: u16) -> bool {
        match self {
            Self::Port(p) => *p == port,
            Self::Ports(ports) => ports.contains(&port),
            Self::Range(range) => range.contains(&port),
        }
    }
}

impl From<&[u16]> for PortMatcher {
    fn from(ports: &[u16]) -> Self {
        Self::Ports(ports.to_vec())
    }
}

/// Port-to-detector table with a guaranteed fallback.
///
/// Entries are matched in registration order; the first match wins. Ports
/// nobody claims go straight to the fallback banner grab, and a claimed
/// port whose detector fails gets the banner grab as a second chance.
pub struct DetectorRegistry {
    entries: Vec<(PortMatcher, Arc<dyn Detector>)>,
    fallback: Arc<dyn Detector>,
}

impl DetectorRegistry {
    /// A registry with only the banner-grab fallback.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            fallback: Arc::new(BannerDetector::new()),
        }
    }

    /// The standard table: HTTP, TLS, SSH, and database detectors.
    pub fn standard(tier: DetectionTier) -> Self {
        Self::empty()
            .register(HTTP_PORTS.into(), HttpDetector::new(tier))
            .register(TLS_PORTS.into(), TlsDetector::new(tier))
            .register(PortMatcher::Port(22), SshDetector::new(tier))
            .register(DATABASE_PORTS.into(), DatabaseDetector::new(tier))
    }

    /// Append an entry.
    pub fn register<D: Detector + 'static>(mut self, matcher: PortMatcher, detector: D) -> Self {
        self.entries.push((matcher, Arc::new(detector)));
        self
    }

    /// The detector claiming `port`, if any besides the fallback.
    pub fn lookup(&self, port: u16) -> Option<&Arc<dyn Detector>> {
        self.entries
            .iter()
            .find(|(matcher, _)| matcher.matches(port))
            .map(|(_, detector)| detector)
    }

    /// Identify the service at `ctx.addr`, or `None` if nothing recognizable
    /// answered. Never fails: detector errors, timeouts, and panics all
    /// degrade to the next option.
    pub async fn identify(&self, ctx: &ProbeContext) -> Option<ServiceInfo> {
        let port = ctx.addr.port();

        if let Some(primary) = self.lookup(port) {
            match run_guarded(primary.as_ref(), ctx).await {
                Ok(info) => return Some(info),
                Err(e) => debug!(
                    port,
                    detector = primary.name(),
                    error = %e,
                    "detector failed, falling back to banner grab"
                ),
            }
        }

        match run_guarded(self.fallback.as_ref(), ctx).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(port, error = %e, "no service identified");
                None
            }
        }
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::standard(DetectionTier::Basic)
    }
}

async fn run_guarded(detector: &dyn Detector, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    let budget = ctx.timeout * detector.stages();
    match timeout(budget, AssertUnwindSafe(detector.detect(ctx)).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(DetectError::Malformed(format!(
            "{} detector panicked",
            detector.name()
        ))),
        Err(_) => Err(DetectError::Timeout),
    }
}

/// Run one detection stage within `budget`.
pub(crate) async fn within<T, F>(budget: Duration, fut: F) -> DetectResult<T>
where
    F: Future<Output = DetectResult<T>>,
{
    timeout(budget, fut)
        .await
        .map_err(|_| DetectError::Timeout)?
}

/// Connect to the service with the stage budget.
pub(crate) async fn connect(ctx: &ProbeContext) -> DetectResult<TcpStream> {
    timeout(ctx.timeout, TcpStream::connect(ctx.addr))
        .await
        .map_err(|_| DetectError::Timeout)?
        .map_err(DetectError::from)
}

/// One read of at most `max` bytes, waiting no longer than `wait`.
///
/// An immediate EOF or an expired wait both count as silence.
pub(crate) async fn read_some(
    stream: &mut TcpStream,
    wait: Duration,
    max: usize,
) -> DetectResult<Vec<u8>> {
    let mut buf = vec![0u8; max];
    match timeout(wait, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            Ok(buf)
        }
        Ok(Ok(_)) | Err(_) => Err(DetectError::Silent),
        Ok(Err(e)) => Err(e.into()),
    }
}

/// Read until EOF, `max` bytes, or `wait` elapses, keeping what arrived.
pub(crate) async fn read_bounded(
    stream: &mut TcpStream,
    wait: Duration,
    max: usize,
) -> DetectResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 2048];
    let deadline = tokio::time::Instant::now() + wait;

    while data.len() < max {
        match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => data.extend_from_slice(&chunk[..n.min(max - data.len())]),
            Ok(Err(e)) if data.is_empty() => return Err(e.into()),
            Ok(Err(_)) => break,
        }
    }

    if data.is_empty() {
        Err(DetectError::Silent)
    } else {
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::traits::Confidence;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    struct Failing;

    #[async_trait]
    impl Detector for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn detect(&self, _ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
            Err(DetectError::Malformed("boom".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Detector for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn detect(&self, _ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
            panic!("detector bug")
        }
    }

    async fn greeting_server(greeting: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(greeting).await;
            }
        });
        addr
    }

    #[test]
    fn test_standard_table() {
        let registry = DetectorRegistry::standard(DetectionTier::Basic);
        assert_eq!(registry.lookup(80).unwrap().name(), "http");
        assert_eq!(registry.lookup(8443).unwrap().name(), "http");
        assert_eq!(registry.lookup(993).unwrap().name(), "tls");
        assert_eq!(registry.lookup(22).unwrap().name(), "ssh");
        assert_eq!(registry.lookup(6379).unwrap().name(), "database");
        assert!(registry.lookup(31337).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let registry = DetectorRegistry::empty()
            .register(PortMatcher::Range(1000..=2000), SshDetector::new(DetectionTier::Basic))
            .register(PortMatcher::Port(1500), HttpDetector::new(DetectionTier::Basic));
        assert_eq!(registry.lookup(1500).unwrap().name(), "ssh");
    }

    #[tokio::test]
    async fn test_failed_detector_falls_back_to_banner() {
        let addr = greeting_server(b"220 mail.example.com ESMTP Postfix\r\n").await;
        let registry = DetectorRegistry::empty().register(PortMatcher::Port(addr.port()), Failing);
        let ctx = ProbeContext::new(addr, "127.0.0.1", Duration::from_millis(500));

        let info = registry.identify(&ctx).await.unwrap();
        assert_eq!(info.name, "SMTP");
        assert_eq!(info.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_panicking_detector_degrades() {
        let addr = greeting_server(b"").await;
        let registry =
            DetectorRegistry::empty().register(PortMatcher::Port(addr.port()), Panicking);
        let ctx = ProbeContext::new(addr, "127.0.0.1", Duration::from_millis(200));

        assert!(registry.identify(&ctx).await.is_none());
    }
}
