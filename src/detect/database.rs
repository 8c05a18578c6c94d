//! Database and data store detector.
//!
//! The enhanced path speaks just enough of each store's protocol to get a
//! version out of it. The basic path only listens for a greeting, which
//! MySQL and friends send unprompted.

use super::banner::{identify_banner, sanitize_banner};
use super::http::fetch_raw;
use super::{connect, read_some, within, Detector, ProbeContext};
use crate::config::DetectionTier;
use crate::error::{DetectError, DetectResult};
use crate::scanner::traits::{Confidence, ServiceInfo};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// PostgreSQL SSLRequest: length 8, code 80877103.
const PG_SSL_REQUEST: [u8; 8] = [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];

const MAX_REPLY_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct DatabaseDetector {
    tier: DetectionTier,
}

impl DatabaseDetector {
    pub fn new(tier: DetectionTier) -> Self {
        Self { tier }
    }
}

#[async_trait]
impl Detector for DatabaseDetector {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn detect(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        if self.tier == DetectionTier::Enhanced {
            match within(ctx.timeout, probe_store(ctx)).await {
                Ok(Some(info)) => return Ok(info),
                Ok(None) => {}
                Err(e) => debug!(
                    addr = %ctx.addr,
                    error = %e,
                    "database probe failed, listening for greeting"
                ),
            }
        }

        let greeting = within(ctx.timeout, read_greeting(ctx)).await?;
        Ok(parse_greeting(&greeting, DetectionTier::Basic))
    }
}

/// Protocol-specific version probe, `None` for ports without one.
async fn probe_store(ctx: &ProbeContext) -> DetectResult<Option<ServiceInfo>> {
    let info = match ctx.addr.port() {
        6379 => probe_redis(ctx).await?,
        5432 => probe_postgres(ctx).await?,
        11211 => probe_memcached(ctx).await?,
        9200 => probe_elasticsearch(ctx).await?,
        5984 => probe_couchdb(ctx).await?,
        8086 => probe_influxdb(ctx).await?,
        3306 => parse_greeting(&read_greeting(ctx).await?, DetectionTier::Enhanced),
        _ => return Ok(None),
    };
    Ok(Some(info))
}

fn enhanced(name: &str) -> ServiceInfo {
    ServiceInfo::new(name, Confidence::Medium, DetectionTier::Enhanced)
}

/// Send `request` on a fresh connection and return the first reply.
async fn exchange(ctx: &ProbeContext, request: &[u8]) -> DetectResult<Vec<u8>> {
    let mut stream = connect(ctx).await?;
    stream.write_all(request).await?;
    read_some(&mut stream, ctx.timeout, MAX_REPLY_BYTES).await
}

async fn probe_redis(ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    let reply = exchange(ctx, b"INFO server\r\n").await?;
    parse_redis_info(&String::from_utf8_lossy(&reply))
}

fn parse_redis_info(reply: &str) -> DetectResult<ServiceInfo> {
    if let Some(version) = info_field(reply, "redis_version") {
        return Ok(enhanced("Redis")
            .with_version(Some(version.to_string()))
            .with_detail("mode", info_field(reply, "redis_mode"))
            .with_detail("os", info_field(reply, "os")));
    }
    if reply.starts_with("-NOAUTH") || (reply.starts_with("-ERR") && reply.contains("auth")) {
        return Ok(enhanced("Redis").with_detail("auth", Some("required")));
    }
    Err(DetectError::Malformed("not a Redis INFO reply".to_string()))
}

fn info_field<'a>(reply: &'a str, key: &str) -> Option<&'a str> {
    reply
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .map(str::trim)
}

async fn probe_postgres(ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    let reply = exchange(ctx, &PG_SSL_REQUEST).await?;
    let ssl = match reply.first() {
        Some(b'S') => "supported",
        Some(b'N') => "not supported",
        // Pre-7.0 servers answer with an ErrorResponse.
        Some(b'E') => "unknown",
        _ => return Err(DetectError::Malformed("unexpected SSLRequest reply".to_string())),
    };
    Ok(enhanced("PostgreSQL").with_detail("ssl", Some(ssl)))
}

async fn probe_memcached(ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    let reply = exchange(ctx, b"version\r\n").await?;
    let reply = String::from_utf8_lossy(&reply);
    let version = reply
        .trim()
        .strip_prefix("VERSION ")
        .ok_or_else(|| DetectError::Malformed("not a memcached reply".to_string()))?;
    Ok(enhanced("Memcached").with_version(Some(version.to_string())))
}

async fn probe_elasticsearch(ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    let response = fetch_raw(ctx, "/").await?;
    parse_elasticsearch(&response.body)
}

fn parse_elasticsearch(body: &str) -> DetectResult<ServiceInfo> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| DetectError::Malformed(e.to_string()))?;
    let version = &json["version"];
    if version.is_null() && json.get("tagline").is_none() {
        return Err(DetectError::Malformed("no Elasticsearch version".to_string()));
    }

    let name = match version["distribution"].as_str() {
        Some("opensearch") => "OpenSearch",
        _ => "Elasticsearch",
    };
    Ok(enhanced(name)
        .with_version(version["number"].as_str().map(str::to_string))
        .with_detail("cluster", json["cluster_name"].as_str()))
}

async fn probe_couchdb(ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    let response = fetch_raw(ctx, "/").await?;
    let json: Value =
        serde_json::from_str(&response.body).map_err(|e| DetectError::Malformed(e.to_string()))?;
    if json.get("couchdb").is_none() {
        return Err(DetectError::Malformed("not a CouchDB welcome".to_string()));
    }
    Ok(enhanced("CouchDB")
        .with_version(json["version"].as_str().map(str::to_string))
        .with_detail("vendor", json["vendor"]["name"].as_str()))
}

async fn probe_influxdb(ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
    let response = fetch_raw(ctx, "/ping").await?;
    let version = response
        .header("x-influxdb-version")
        .ok_or_else(|| DetectError::Malformed("no InfluxDB version header".to_string()))?;
    Ok(enhanced("InfluxDB")
        .with_version(Some(version.to_string()))
        .with_detail("build", response.header("x-influxdb-build")))
}

/// Whatever the server sends unprompted.
async fn read_greeting(ctx: &ProbeContext) -> DetectResult<Vec<u8>> {
    let mut stream = connect(ctx).await?;
    read_some(&mut stream, ctx.timeout, MAX_REPLY_BYTES).await
}

/// Identify a greeting: MySQL handshake packets are decoded, anything else
/// goes through the banner keyword table.
fn parse_greeting(data: &[u8], method: DetectionTier) -> ServiceInfo {
    if let Some(info) = parse_mysql_greeting(data, method) {
        return info;
    }
    let mut info = identify_banner(&sanitize_banner(data));
    info.method = method;
    info
}

/// Decode a MySQL initial handshake or connection-refused error packet.
fn parse_mysql_greeting(data: &[u8], method: DetectionTier) -> Option<ServiceInfo> {
    // 3-byte payload length, 1-byte sequence id, then payload.
    let payload = data.get(4..)?;
    let confidence = match method {
        DetectionTier::Enhanced => Confidence::Medium,
        DetectionTier::Basic => Confidence::Low,
    };

    match payload.first()? {
        0x0a => {
            let end = payload[1..].iter().position(|&b| b == 0)?;
            let version = String::from_utf8_lossy(&payload[1..1 + end]).into_owned();
            let name = if version.to_lowercase().contains("mariadb") {
                "MariaDB"
            } else {
                "MySQL"
            };
            Some(ServiceInfo::new(name, confidence, method).with_version(Some(version)))
        }
        // Error packet, e.g. "Host '10.0.0.5' is not allowed to connect".
        0xff if payload.len() > 3 => {
            let mut message = &payload[3..];
            if message.first() == Some(&b'#') && message.len() > 6 {
                message = &message[6..]; // '#' plus SQLSTATE
            }
            Some(
                ServiceInfo::new("MySQL", confidence, method)
                    .with_detail("error", Some(sanitize_banner(message))),
            )
        }
        _ => None,
    }
}
