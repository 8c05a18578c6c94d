//! TLS detector for implicit-TLS ports.
//!
//! The enhanced path completes a handshake and reads the peer certificate;
//! the basic path sends a bare ClientHello and only checks that a TLS
//! record comes back.

use super::{connect, read_some, within, Detector, ProbeContext};
use crate::config::DetectionTier;
use crate::error::{DetectError, DetectResult};
use crate::scanner::traits::{Confidence, ServiceInfo};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// TLS content types we accept as an answer to a ClientHello.
const RECORD_ALERT: u8 = 0x15;
const RECORD_HANDSHAKE: u8 = 0x16;

/// Cipher suites offered by the sniffing ClientHello.
const CIPHER_SUITES: &[u16] = &[
    0x1301, 0x1302, 0x1303, // TLS 1.3
    0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, // ECDHE AEAD
    0x009c, 0x009d, 0x002f, 0x0035, // RSA
];

/// Most SAN entries listed in the detail map.
#[cfg(feature = "enhanced")]
const MAX_SANS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct TlsDetector {
    tier: DetectionTier,
}

impl TlsDetector {
    pub fn new(tier: DetectionTier) -> Self {
        Self { tier }
    }
}

#[async_trait]
impl Detector for TlsDetector {
    fn name(&self) -> &'static str {
        "tls"
    }

    async fn detect(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        if self.tier == DetectionTier::Enhanced {
            match handshake(ctx).await {
                Ok(info) => return Ok(info),
                Err(e) => debug!(
                    addr = %ctx.addr,
                    error = %e,
                    "TLS handshake failed, trying record sniff"
                ),
            }
        }

        let record = within(ctx.timeout, sniff(ctx)).await?;
        Ok(ServiceInfo::new("TLS", Confidence::Low, DetectionTier::Basic)
            .with_detail("record", Some(record)))
    }
}

/// Send a ClientHello and classify the first record of the reply.
pub(crate) async fn sniff(ctx: &ProbeContext) -> DetectResult<&'static str> {
    let mut stream = connect(ctx).await?;
    stream.write_all(&client_hello()).await?;
    let reply = read_some(&mut stream, ctx.timeout, 16).await?;

    classify_record(&reply)
        .ok_or_else(|| DetectError::Malformed("reply is not a TLS record".to_string()))
}

fn classify_record(reply: &[u8]) -> Option<&'static str> {
    match reply {
        [RECORD_HANDSHAKE, 0x03, minor, ..] if *minor <= 0x04 => Some("handshake"),
        [RECORD_ALERT, 0x03, minor, ..] if *minor <= 0x04 => Some("alert"),
        _ => None,
    }
}

/// A minimal TLS 1.2 ClientHello without extensions.
fn client_hello() -> Vec<u8> {
    let mut body = Vec::with_capacity(64 + CIPHER_SUITES.len() * 2);
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0u8; 32]); // random
    body.push(0); // empty session id
    body.extend_from_slice(&((CIPHER_SUITES.len() * 2) as u16).to_be_bytes());
    for suite in CIPHER_SUITES {
        body.extend_from_slice(&suite.to_be_bytes());
    }
    body.extend_from_slice(&[1, 0]); // null compression only

    let mut handshake = vec![0x01]; // ClientHello
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend(body);

    let mut record = vec![RECORD_HANDSHAKE, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend(handshake);
    record
}

#[cfg(feature = "enhanced")]
async fn handshake(ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    within(ctx.timeout, async {
        let stream = connect(ctx).await?;
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .use_sni(!ctx.is_literal_address())
            .build()
            .map_err(|e| DetectError::Tls(e.to_string()))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let tls = connector
            .connect(&ctx.server_name, stream)
            .await
            .map_err(|e| DetectError::Tls(e.to_string()))?;

        let der = tls
            .get_ref()
            .peer_certificate()
            .map_err(|e| DetectError::Tls(e.to_string()))?
            .map(|cert| cert.to_der())
            .transpose()
            .map_err(|e| DetectError::Tls(e.to_string()))?;

        let info = ServiceInfo::new("TLS", Confidence::High, DetectionTier::Enhanced);
        Ok(match der {
            Some(der) => describe_certificate(info, &der),
            None => info,
        })
    })
    .await
}

#[cfg(not(feature = "enhanced"))]
async fn handshake(_ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    Err(DetectError::Tls("TLS support not compiled in".to_string()))
}

/// Add subject, issuer, and alternative names from a DER certificate.
#[cfg(feature = "enhanced")]
fn describe_certificate(info: ServiceInfo, der: &[u8]) -> ServiceInfo {
    use x509_parser::prelude::*;

    let Ok((_, cert)) = X509Certificate::from_der(der) else {
        debug!("peer certificate did not parse");
        return info;
    };

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let mut sans = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    sans.push(dns.to_string());
                }
            }
        }
    }
    sans.sort();
    sans.dedup();
    let sans = (!sans.is_empty()).then(|| {
        let shown: Vec<_> = sans.iter().take(MAX_SANS).cloned().collect();
        if sans.len() > MAX_SANS {
            format!("{}, ...", shown.join(", "))
        } else {
            shown.join(", ")
        }
    });

    info.with_detail("subject", Some(cert.subject()))
        .with_detail("issuer", Some(cert.issuer()))
        .with_detail("common_name", common_name)
        .with_detail("alt_names", sans)
}
