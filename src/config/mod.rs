//! Configuration for scan-ports.
//!
//! `ScanConfig` is the immutable value handed down through the coordinator,
//! workers, and detectors. `AppSettings` supplies user defaults and named
//! port lists from an XDG-compliant settings file.

mod scan;
mod settings;

pub use scan::{Capability, DetectionTier, ScanConfig, ScanConfigBuilder};
pub use settings::{builtin_port_lists, AppSettings, Paths, PortList};
