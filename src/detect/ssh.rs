//! SSH identification-string detector.
//!
//! SSH servers speak first with `SSH-protoversion-softwareversion comments`,
//! possibly preceded by other lines (RFC 4253 section 4.2).

use super::{connect, Detector, ProbeContext};
use crate::config::DetectionTier;
use crate::error::{DetectError, DetectResult};
use crate::scanner::traits::{Confidence, ServiceInfo};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// RFC 4253 caps the identification line at 255 bytes; allow a few
/// preamble lines in front of it.
const MAX_IDENT_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct SshDetector {
    tier: DetectionTier,
}

impl SshDetector {
    pub fn new(tier: DetectionTier) -> Self {
        Self { tier }
    }
}

/// A parsed SSH identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SshIdent {
    pub proto: String,
    pub software: String,
    pub comments: Option<String>,
}

impl SshIdent {
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let rest = line.trim_end().strip_prefix("SSH-")?;
        let (proto, rest) = rest.split_once('-')?;
        let (software, comments) = match rest.split_once(' ') {
            Some((software, comments)) => (software, Some(comments.trim().to_string())),
            None => (rest, None),
        };
        if proto.is_empty() || software.is_empty() {
            return None;
        }

        Some(Self {
            proto: proto.to_string(),
            software: software.to_string(),
            comments: comments.filter(|c| !c.is_empty()),
        })
    }
}

#[async_trait]
impl Detector for SshDetector {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn detect(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        let line = read_identification(ctx).await?;

        if self.tier == DetectionTier::Enhanced {
            if let Some(ident) = SshIdent::parse(&line) {
                return Ok(ServiceInfo::new("SSH", Confidence::High, DetectionTier::Enhanced)
                    .with_version(Some(ident.software.clone()))
                    .with_banner(Some(line.clone()))
                    .with_detail("protocol", Some(ident.proto))
                    .with_detail("software", Some(ident.software))
                    .with_detail("comments", ident.comments));
            }
            debug!(addr = %ctx.addr, %line, "unparseable SSH identification");
        }

        Ok(ServiceInfo::new("SSH", Confidence::Low, DetectionTier::Basic).with_banner(Some(line)))
    }
}

/// Read until the `SSH-` line shows up, EOF, or the stage budget runs out.
async fn read_identification(ctx: &ProbeContext) -> DetectResult<String> {
    let mut stream = connect(ctx).await?;
    let deadline = Instant::now() + ctx.timeout;
    let mut data = Vec::new();
    let mut chunk = [0u8; 256];

    while data.len() < MAX_IDENT_BYTES {
        if let Some(line) = find_ident_line(&data, false) {
            return Ok(line);
        }
        match timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => data.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    if data.is_empty() {
        return Err(DetectError::Silent);
    }
    find_ident_line(&data, true)
        .ok_or_else(|| DetectError::Malformed("no SSH identification line".to_string()))
}

/// The first `SSH-` line in `data`. Unterminated trailing text only counts
/// once no more input is coming.
fn find_ident_line(data: &[u8], finished: bool) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    let complete = if finished {
        &*text
    } else {
        &text[..text.rfind('\n')? + 1]
    };

    complete
        .lines()
        .map(str::trim_end)
        .find(|line| line.starts_with("SSH-"))
        .map(str::to_string)
}
