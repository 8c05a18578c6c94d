//! TCP connect prober.
//!
//! Performs standard TCP connects through the operating system's socket
//! API. No privileges needed; the full handshake is completed and the
//! socket is dropped again before the outcome is reported.

use crate::scanner::traits::{ProbeOutcome, Prober};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Prober backed by real TCP connects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl TcpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: SocketAddr, connect_timeout: Duration) -> ProbeOutcome {
        let outcome = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                ProbeOutcome::Open
            }
            Ok(Err(e)) => classify_connect_error(&e),
            Err(_) => ProbeOutcome::Filtered,
        };
        trace!(%addr, ?outcome, "probe finished");
        outcome
    }
}

/// Map a failed connect to a port outcome.
///
/// Refusals and resets are closed. Unreachable hosts and networks, and
/// connects rejected by a local firewall, count as filtered. Running out of local sockets or ephemeral ports is
/// exhaustion. Anything unrecognized is treated as closed.
pub(crate) fn classify_connect_error(err: &io::Error) -> ProbeOutcome {
    match err.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
            return ProbeOutcome::Closed
        }
        io::ErrorKind::TimedOut | io::ErrorKind::PermissionDenied => {
            return ProbeOutcome::Filtered
        }
        io::ErrorKind::AddrNotAvailable => return ProbeOutcome::Exhausted(err.to_string()),
        _ => {}
    }

    err.raw_os_error()
        .and_then(|code| classify_os_error(code, err))
        .unwrap_or(ProbeOutcome::Closed)
}

#[cfg(unix)]
fn classify_os_error(code: i32, err: &io::Error) -> Option<ProbeOutcome> {
    match code {
        libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::EADDRNOTAVAIL => {
            Some(ProbeOutcome::Exhausted(err.to_string()))
        }
        libc::EHOSTUNREACH
        | libc::ENETUNREACH
        | libc::EHOSTDOWN
        | libc::ENETDOWN
        | libc::EPERM
        | libc::EACCES => Some(ProbeOutcome::Filtered),
        _ => None,
    }
}

#[cfg(not(unix))]
fn classify_os_error(_code: i32, _err: &io::Error) -> Option<ProbeOutcome> {
    None
}
