//! Banner grabbing, the detector of last resort.
//!
//! Reads whatever the service volunteers after connecting. Silent services
//! get an HTTP request and then generic nudges on the same connection, and the
//! first text that comes back is matched against a keyword table.

use super::{connect, read_some, Detector, ProbeContext};
use crate::config::DetectionTier;
use crate::error::{DetectError, DetectResult};
use crate::scanner::traits::{Confidence, ServiceInfo};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::trace;

/// Maximum bytes to read for a banner.
const MAX_BANNER_SIZE: usize = 1024;

/// Maximum characters kept after sanitizing.
const MAX_BANNER_CHARS: usize = 200;

/// Longest name derived from an unrecognized banner.
const MAX_NAME_CHARS: usize = 30;

/// Generic nudges sent after the HTTP request, in order.
const NUDGES: &[&[u8]] = &[b"\r\n", b"HELP\r\n"];

/// Banner keywords and the service they identify. First match wins.
const KNOWN_SERVICES: &[(&str, &str)] = &[
    ("ssh", "SSH"),
    ("http", "HTTP"),
    ("html", "HTTP"),
    ("ftp", "FTP"),
    ("smtp", "SMTP"),
    ("pop3", "POP3"),
    ("imap", "IMAP"),
    ("mysql", "MySQL"),
    ("mariadb", "MySQL"),
    ("postgres", "PostgreSQL"),
    ("redis", "Redis"),
    ("mongodb", "MongoDB"),
    ("elastic", "Elasticsearch"),
    ("memcached", "Memcached"),
    ("vnc", "VNC"),
    ("rfb", "VNC"),
    ("amqp", "AMQP"),
];

/// Protocol-agnostic banner grab.
#[derive(Debug, Clone, Copy, Default)]
pub struct BannerDetector;

impl BannerDetector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detector for BannerDetector {
    fn name(&self) -> &'static str {
        "banner"
    }

    /// Connecting, then listening and nudging.
    fn stages(&self) -> u32 {
        2
    }

    async fn detect(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        let stream = connect(ctx).await?;
        let raw = grab_banner_from_stream(stream, ctx).await?;
        let banner = sanitize_banner(&raw);
        if banner.is_empty() {
            return Err(DetectError::Silent);
        }
        trace!(addr = %ctx.addr, %banner, "banner received");
        Ok(identify_banner(&banner))
    }
}

/// Read the unprompted greeting, nudging the service if it has none.
///
/// Half of one stage budget goes to waiting for a greeting, the rest is
/// shared by the nudges: an HTTP request first, then the generic ones.
async fn grab_banner_from_stream(
    mut stream: TcpStream,
    ctx: &ProbeContext,
) -> DetectResult<Vec<u8>> {
    let nudges = nudges(ctx);
    let greeting_wait = ctx.timeout / 2;
    let nudge_wait = ctx.timeout / (2 * nudges.len() as u32);

    match read_some(&mut stream, greeting_wait, MAX_BANNER_SIZE).await {
        Ok(data) => return Ok(data),
        Err(DetectError::Silent) => {}
        Err(e) => return Err(e),
    }

    for nudge in &nudges {
        stream.write_all(nudge).await?;
        match read_some(&mut stream, nudge_wait, MAX_BANNER_SIZE).await {
            Ok(data) => return Ok(data),
            Err(DetectError::Silent) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(DetectError::Silent)
}

fn nudges(ctx: &ProbeContext) -> Vec<Vec<u8>> {
    let http = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", ctx.server_name);
    std::iter::once(http.into_bytes())
        .chain(NUDGES.iter().map(|n| n.to_vec()))
        .collect()
}

/// Name a service from its sanitized banner.
///
/// Known keywords give a named service with a version pulled from the text;
/// anything else is reported under its first words.
pub fn identify_banner(banner: &str) -> ServiceInfo {
    let lower = banner.to_lowercase();
    let (name, version) = match KNOWN_SERVICES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
    {
        Some((_, name)) => (name.to_string(), extract_version(banner)),
        None => (banner.chars().take(MAX_NAME_CHARS).collect::<String>(), None),
    };

    ServiceInfo::new(name.trim(), Confidence::Low, DetectionTier::Basic)
        .with_version(version)
        .with_banner(Some(banner.to_string()))
}

/// Version-looking run of digits and dots, e.g. "8.9" in "OpenSSH_8.9p1".
///
/// A leading three-digit reply code ("220 ", "220-") is not a version, and
/// dotted runs win over bare numbers.
fn extract_version(text: &str) -> Option<String> {
    let runs: Vec<&str> = strip_reply_code(text)
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|run| run.trim_matches('.'))
        .filter(|run| run.chars().any(|c| c.is_ascii_digit()))
        .collect();

    runs.iter()
        .find(|run| run.contains('.'))
        .or_else(|| runs.first())
        .map(|run| run.to_string())
}

fn strip_reply_code(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() > 3
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && matches!(bytes[3], b' ' | b'-')
    {
        &text[4..]
    } else {
        text
    }
}

/// Sanitize banner by removing non-printable characters and limiting length.
pub fn sanitize_banner(data: &[u8]) -> String {
    let s: String = data
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else if b == b'\r' || b == b'\n' || b == b'\t' {
                ' '
            } else {
                '.'
            }
        })
        .collect();

    // Collapse multiple spaces and trim
    let mut result = String::new();
    let mut prev_space = false;
    for c in s.chars() {
        if c == ' ' {
            if !prev_space {
                result.push(c);
            }
            prev_space = true;
        } else {
            result.push(c);
            prev_space = false;
        }
    }

    result.trim().chars().take(MAX_BANNER_CHARS).collect()
}
