//! Target specification types with CIDR and hostname support.
//!
//! Provides flexible target parsing supporting:
//! - Single IP addresses (IPv4 and IPv6)
//! - CIDR notation (192.168.1.0/24)
//! - Hostnames (example.com)

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// A single scan target that has been resolved to an IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTarget {
    /// The original input (hostname, IP string, or CIDR).
    pub host: String,
    /// The resolved IP address.
    pub address: IpAddr,
}

impl ScanTarget {
    /// Create a new scan target.
    pub fn new(host: impl Into<String>, address: IpAddr) -> Self {
        Self {
            host: host.into(),
            address,
        }
    }

    /// Name to use for SNI and `Host` headers.
    ///
    /// Literal addresses and CIDR members fall back to the IP itself.
    pub fn server_name(&self) -> String {
        if self.host.parse::<IpAddr>().is_ok() || self.host.contains('/') {
            self.address.to_string()
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.address.to_string() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.host, self.address)
        }
    }
}

/// Failure to turn a host string into a connectable address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("invalid target format: {0}")]
    InvalidFormat(String),
    #[error("failed to resolve hostname '{0}': {1}")]
    DnsResolutionFailed(String, String),
    #[error("resolving hostname '{0}' timed out")]
    Timeout(String),
    #[error("no IP addresses found for hostname '{0}'")]
    NoAddressesFound(String),
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),
    #[error("CIDR range too large: {0} addresses (max: {1})")]
    CidrTooLarge(u128, u128),
}

/// A target specification that may expand to several targets.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    /// A single IP address.
    Single(IpAddr),
    /// A CIDR network range.
    Cidr(IpNetwork),
    /// A hostname to be resolved.
    Hostname(String),
}

impl TargetSpec {
    /// Maximum number of hosts allowed in a CIDR range.
    pub const MAX_CIDR_HOSTS: u128 = 65536;

    /// Parse a target specification from a string.
    pub fn parse(s: &str) -> Result<Self, ResolutionError> {
        let s = s.trim();

        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::Single(ip));
        }

        if s.contains('/') {
            let network: IpNetwork = s
                .parse()
                .map_err(|_| ResolutionError::InvalidCidr(s.to_string()))?;

            let host_count = network_size(&network);
            if host_count > Self::MAX_CIDR_HOSTS {
                return Err(ResolutionError::CidrTooLarge(
                    host_count,
                    Self::MAX_CIDR_HOSTS,
                ));
            }

            return Ok(Self::Cidr(network));
        }

        if is_valid_hostname(s) {
            return Ok(Self::Hostname(s.to_string()));
        }

        Err(ResolutionError::InvalidFormat(s.to_string()))
    }

    /// Resolve this specification to scan targets.
    ///
    /// CIDR ranges expand to their host addresses. Hostnames go through DNS,
    /// bounded by `timeout`; the first address returned wins.
    pub async fn resolve(&self, timeout: Duration) -> Result<Vec<ScanTarget>, ResolutionError> {
        match self {
            Self::Single(ip) => Ok(vec![ScanTarget::new(ip.to_string(), *ip)]),

            Self::Cidr(network) => {
                let original = network.to_string();
                let targets = network
                    .iter()
                    .filter(|ip| {
                        if let (IpNetwork::V4(net), IpAddr::V4(addr)) = (network, ip) {
                            if net.prefix() < 31 {
                                return *addr != net.network() && *addr != net.broadcast();
                            }
                        }
                        true
                    })
                    .map(|ip| ScanTarget::new(original.clone(), ip))
                    .collect();
                Ok(targets)
            }

            Self::Hostname(hostname) => {
                let mut opts = ResolverOpts::default();
                opts.timeout = timeout;
                opts.attempts = 1;
                let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

                debug!(%hostname, ?timeout, "resolving target");
                let response = tokio::time::timeout(timeout, resolver.lookup_ip(hostname.as_str()))
                    .await
                    .map_err(|_| ResolutionError::Timeout(hostname.clone()))?
                    .map_err(|e| {
                        ResolutionError::DnsResolutionFailed(hostname.clone(), e.to_string())
                    })?;

                let ip = response
                    .iter()
                    .next()
                    .ok_or_else(|| ResolutionError::NoAddressesFound(hostname.clone()))?;

                Ok(vec![ScanTarget::new(hostname.clone(), ip)])
            }
        }
    }
}

fn network_size(network: &IpNetwork) -> u128 {
    match network {
        IpNetwork::V4(net) => u128::from(net.size()),
        IpNetwork::V6(net) => {
            let prefix = u32::from(net.prefix());
            if prefix >= 128 {
                1
            } else {
                1u128 << (128 - prefix)
            }
        }
    }
}

/// Check if a string is a valid RFC 1123 hostname.
fn is_valid_hostname(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }

    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
            && label.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
