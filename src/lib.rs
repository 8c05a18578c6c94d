//! # scan-ports - Concurrent TCP Port Scanning with Service Detection
//!
//! Probes a set of TCP ports on one or more hosts with bounded concurrency
//! and identifies what runs behind each open port.
//!
//! ## Features
//!
//! - **Bounded Concurrency**: A semaphore-gated worker pool with a strict per-port timeout
//! - **Complete Reports**: Every requested port appears exactly once, in ascending order
//! - **Tiered Detection**: Enhanced probes (HTTP client, TLS handshake) fall back to
//!   basic socket probes and finally to a banner grab
//! - **Cooperative Stopping**: Cancellation and a global deadline yield partial reports
//! - **Flexible Targeting**: Single IPs, hostnames, and CIDR ranges
//! - **Multiple Output Formats**: Plain text, JSON, and CSV
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use scan_ports::{Capability, Coordinator, DetectionTier, ScanConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ScanConfig::builder()
//!         .timeout(Duration::from_millis(500))
//!         .concurrency(100)
//!         .detection_tier(DetectionTier::Enhanced)
//!         .build()?;
//!
//!     let coordinator = Coordinator::new(config, Capability::available());
//!     let reports = coordinator.scan_hosts(&["127.0.0.1"], &"1-1024".parse()?).await?;
//!
//!     for report in &reports {
//!         println!("{}", report.summary());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Ports, port specifications, and target resolution
//! - [`config`] - Scan parameters, detection tiers, and user settings
//! - [`scanner`] - The coordinator, the connection prober, and the result model
//! - [`detect`] - Per-protocol service detectors and the banner fallback
//! - [`services`] - Conventional service names for well-known ports
//! - [`error`] - Error types
//! - [`output`] - Plain, JSON, and CSV renderers
//! - [`cli`] - Command-line interface for the `scan-ports` binary

pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod output;
pub mod scanner;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use config::{Capability, DetectionTier, ScanConfig};
pub use error::{ConfigError, ScanError};
pub use scanner::{Confidence, Coordinator, PortResult, PortState, ScanReport, ServiceInfo};
pub use types::{Port, PortSpec, ScanTarget, TargetSpec};
