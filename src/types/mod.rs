//! Core type definitions using newtype patterns for type safety.
//!
//! These types keep invalid ports and malformed targets from ever reaching
//! the scanner.

mod port;
mod target;

pub use port::{Port, PortError, PortRange, PortSpec, UnknownList};
pub use target::{ResolutionError, ScanTarget, TargetSpec};
