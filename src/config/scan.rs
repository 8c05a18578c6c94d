//! Immutable scan parameters and the detection-tier capability model.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Quality level of service identification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DetectionTier {
    /// Plain sockets only: first bytes and minimal requests.
    Basic,
    /// Full HTTP client and TLS handshakes, when compiled in.
    Enhanced,
}

impl fmt::Display for DetectionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Enhanced => write!(f, "enhanced"),
        }
    }
}

/// Which detection tiers this build can actually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    enhanced: bool,
}

impl Capability {
    /// Capability of the running binary.
    pub const fn available() -> Self {
        Self {
            enhanced: cfg!(feature = "enhanced"),
        }
    }

    /// A capability with only the basic tier.
    pub const fn basic_only() -> Self {
        Self { enhanced: false }
    }

    /// The best tier this capability supports.
    pub const fn best_tier(self) -> DetectionTier {
        if self.enhanced {
            DetectionTier::Enhanced
        } else {
            DetectionTier::Basic
        }
    }

    /// The tier a scan will actually run at when `requested` is asked for.
    pub fn effective_tier(self, requested: DetectionTier) -> DetectionTier {
        requested.min(self.best_tier())
    }

    /// Name and availability of each optional component.
    pub fn components(self) -> Vec<(&'static str, bool)> {
        vec![
            ("reqwest", self.enhanced),
            ("native-tls", self.enhanced),
            ("x509-parser", self.enhanced),
        ]
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::available()
    }
}

/// Validated parameters for one scan call.
///
/// Build with [`ScanConfig::builder`]; invalid values are rejected with a
/// [`ConfigError`], never clamped.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    timeout: Duration,
    concurrency: usize,
    detection_tier: DetectionTier,
    show_closed: bool,
    detect_services: bool,
    detect_timeout: Duration,
    deadline: Option<Duration>,
    timeout_retries: u8,
}

impl ScanConfig {
    /// Start building a configuration from defaults.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Per-connect timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Maximum number of simultaneous port pipelines.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Requested detection tier.
    pub fn detection_tier(&self) -> DetectionTier {
        self.detection_tier
    }

    /// Whether renderers should list closed ports.
    pub fn show_closed(&self) -> bool {
        self.show_closed
    }

    /// Whether open ports get service detection at all.
    pub fn detect_services(&self) -> bool {
        self.detect_services
    }

    /// Budget for each detection stage; never larger than `timeout`.
    pub fn detect_timeout(&self) -> Duration {
        self.detect_timeout
    }

    /// Global deadline measured from the start of the scan.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Extra connect attempts after a timeout before settling on filtered.
    pub fn timeout_retries(&self) -> u8 {
        self.timeout_retries
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug, Clone)]
pub struct ScanConfigBuilder {
    timeout: Duration,
    concurrency: usize,
    detection_tier: DetectionTier,
    show_closed: bool,
    detect_services: bool,
    detect_timeout: Option<Duration>,
    deadline: Option<Duration>,
    timeout_retries: u8,
}

impl Default for ScanConfigBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            concurrency: 50,
            detection_tier: Capability::available().best_tier(),
            show_closed: false,
            detect_services: true,
            detect_timeout: None,
            deadline: None,
            timeout_retries: 0,
        }
    }
}

impl ScanConfigBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn detection_tier(mut self, tier: DetectionTier) -> Self {
        self.detection_tier = tier;
        self
    }

    pub fn show_closed(mut self, show: bool) -> Self {
        self.show_closed = show;
        self
    }

    pub fn detect_services(mut self, detect: bool) -> Self {
        self.detect_services = detect;
        self
    }

    pub fn detect_timeout(mut self, timeout: Duration) -> Self {
        self.detect_timeout = Some(timeout);
        self
    }

    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn timeout_retries(mut self, retries: u8) -> Self {
        self.timeout_retries = retries;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> ConfigResult<ScanConfig> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ConcurrencyTooHigh {
                requested: self.concurrency,
                max: Semaphore::MAX_PERMITS,
            });
        }
        let detect_timeout = self.detect_timeout.unwrap_or(self.timeout);
        if detect_timeout.is_zero() || detect_timeout > self.timeout {
            return Err(ConfigError::InvalidDetectTimeout {
                detect: detect_timeout,
                connect: self.timeout,
            });
        }
        if let Some(deadline) = self.deadline {
            if deadline.is_zero() {
                return Err(ConfigError::ZeroDeadline);
            }
            if Instant::now().checked_add(deadline).is_none() {
                return Err(ConfigError::DeadlineTooFar(deadline));
            }
        }

        Ok(ScanConfig {
            timeout: self.timeout,
            concurrency: self.concurrency,
            detection_tier: self.detection_tier,
            show_closed: self.show_closed,
            detect_services: self.detect_services,
            detect_timeout,
            deadline: self.deadline,
            timeout_retries: self.timeout_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScanConfig::builder().build().unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert_eq!(config.detect_timeout(), config.timeout());
        assert_eq!(config.concurrency(), 50);
        assert_eq!(config.timeout_retries(), 0);
        assert!(config.detect_services());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            ScanConfig::builder().timeout(Duration::ZERO).build(),
            Err(ConfigError::ZeroTimeout)
        ));
        assert!(matches!(
            ScanConfig::builder().concurrency(0).build(),
            Err(ConfigError::ZeroConcurrency)
        ));
        assert!(matches!(
            ScanConfig::builder()
                .timeout(Duration::from_millis(500))
                .detect_timeout(Duration::from_secs(1))
                .build(),
            Err(ConfigError::InvalidDetectTimeout { .. })
        ));
        assert!(matches!(
            ScanConfig::builder().deadline(Some(Duration::ZERO)).build(),
            Err(ConfigError::ZeroDeadline)
        ));
    }

    #[test]
    fn test_rejects_values_the_runtime_cannot_honor() {
        assert!(matches!(
            ScanConfig::builder().concurrency(usize::MAX).build(),
            Err(ConfigError::ConcurrencyTooHigh { requested: usize::MAX, .. })
        ));
        assert!(ScanConfig::builder().concurrency(Semaphore::MAX_PERMITS).build().is_ok());

        let forever = Duration::from_secs(u64::MAX);
        assert!(matches!(
            ScanConfig::builder().deadline(Some(forever)).build(),
            Err(ConfigError::DeadlineTooFar(d)) if d == forever
        ));
        assert!(ScanConfig::builder()
            .deadline(Some(Duration::from_secs(3600)))
            .build()
            .is_ok());
    }

    #[test]
    fn test_effective_tier() {
        let basic = Capability::basic_only();
        assert_eq!(basic.effective_tier(DetectionTier::Enhanced), DetectionTier::Basic);
        assert_eq!(basic.effective_tier(DetectionTier::Basic), DetectionTier::Basic);
        assert!(basic.components().iter().all(|(_, ok)| !ok));
    }
}
