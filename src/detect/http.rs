//! HTTP(S) detector.
//!
//! Enhanced tier: a real HTTP client (certificate checks off, a few
//! redirects followed) that reports status, server, title, and a framework
//! guess. Basic tier: a raw `GET / HTTP/1.0` over a plain socket, plus a
//! TLS record sniff on HTTPS ports.

use super::{connect, read_bounded, tls, within, Detector, ProbeContext, HTTPS_PORTS};
use crate::config::DetectionTier;
use crate::error::{DetectError, DetectResult};
use crate::scanner::traits::{Confidence, ServiceInfo};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub(crate) const USER_AGENT: &str = concat!("scan-ports/", env!("CARGO_PKG_VERSION"));

/// Largest response body inspected.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Longest page title reported.
const MAX_TITLE_CHARS: usize = 50;

/// Body/header keywords that give away the application framework.
/// First match wins.
const FRAMEWORKS: &[(&str, &[&str])] = &[
    ("Django", &["csrftoken", "django"]),
    ("Flask", &["flask", "werkzeug"]),
    ("Express.js", &["x-powered-by: express", "express"]),
    ("Apache", &["apache"]),
    ("Nginx", &["nginx"]),
    ("React", &["__react_devtools", "react"]),
    ("Vue.js", &["__vue__", "vue"]),
    ("Jenkins", &["x-jenkins", "jenkins"]),
    ("Grafana", &["grafana"]),
    ("Prometheus", &["prometheus"]),
    ("GitLab", &["gitlab"]),
    ("Jupyter", &["jupyter", "notebook"]),
    ("Portainer", &["portainer"]),
    ("SonarQube", &["sonarqube"]),
];

pub struct HttpDetector {
    tier: DetectionTier,
    #[cfg(feature = "enhanced")]
    client: Option<reqwest::Client>,
}

impl HttpDetector {
    pub fn new(tier: DetectionTier) -> Self {
        Self {
            tier,
            #[cfg(feature = "enhanced")]
            client: (tier == DetectionTier::Enhanced)
                .then(build_client)
                .and_then(|client| {
                    client
                        .map_err(|e| debug!(error = %e, "HTTP client unavailable"))
                        .ok()
                }),
        }
    }

    #[cfg(feature = "enhanced")]
    async fn detect_enhanced(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| DetectError::Http("HTTP client unavailable".to_string()))?;

        let schemes = schemes_for(ctx.addr.port());
        let per_try = ctx.timeout / schemes.len() as u32;
        let mut last_err = DetectError::Silent;

        for scheme in schemes {
            match fetch_with_client(client, ctx, scheme, per_try).await {
                Ok(page) => {
                    let confidence = if page.framework.is_some() || page.server.is_some() {
                        Confidence::High
                    } else {
                        Confidence::Medium
                    };
                    return Ok(page.into_service(scheme, confidence, DetectionTier::Enhanced));
                }
                Err(e) => {
                    debug!(addr = %ctx.addr, scheme, error = %e, "HTTP request failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    #[cfg(not(feature = "enhanced"))]
    async fn detect_enhanced(&self, _ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        Err(DetectError::Http("HTTP client not compiled in".to_string()))
    }

    async fn detect_basic(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        if HTTPS_PORTS.contains(&ctx.addr.port()) {
            if let Ok(record) = tls::sniff(ctx).await {
                return Ok(ServiceInfo::new("HTTPS", Confidence::Low, DetectionTier::Basic)
                    .with_detail("tls_record", Some(record)));
            }
        }

        let response = fetch_raw(ctx, "/").await?;
        Ok(Page::from_raw(&response).into_service("http", Confidence::Low, DetectionTier::Basic))
    }
}

#[async_trait]
impl Detector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn detect(&self, ctx: &ProbeContext) -> DetectResult<ServiceInfo> {
        if self.tier == DetectionTier::Enhanced {
            match within(ctx.timeout, self.detect_enhanced(ctx)).await {
                Ok(info) => return Ok(info),
                Err(e) => debug!(addr = %ctx.addr, error = %e, "falling back to raw HTTP"),
            }
        }
        within(ctx.timeout, self.detect_basic(ctx)).await
    }
}

fn schemes_for(port: u16) -> &'static [&'static str] {
    if HTTPS_PORTS.contains(&port) {
        &["https", "http"]
    } else {
        &["http"]
    }
}

/// Value for the `Host` header.
fn host_header(ctx: &ProbeContext) -> String {
    if ctx.is_literal_address() {
        ctx.addr.to_string()
    } else {
        format!("{}:{}", ctx.server_name, ctx.addr.port())
    }
}

/// What we learned from one HTTP response.
#[derive(Debug, Default)]
struct Page {
    status: u16,
    server: Option<String>,
    location: Option<String>,
    powered_by: Option<String>,
    title: Option<String>,
    framework: Option<&'static str>,
}

impl Page {
    fn new<'a>(
        status: u16,
        headers: impl Iterator<Item = (&'a str, &'a str)> + Clone,
        body: &str,
    ) -> Self {
        let header = |name: &str| {
            headers
                .clone()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim().to_string())
        };

        let mut haystack = body.to_lowercase();
        for (k, v) in headers.clone() {
            haystack.push('\n');
            haystack.push_str(&k.to_lowercase());
            haystack.push_str(": ");
            haystack.push_str(&v.to_lowercase());
        }

        Self {
            status,
            server: header("server"),
            location: header("location"),
            powered_by: header("x-powered-by"),
            title: extract_title(body),
            framework: detect_framework(&haystack),
        }
    }

    fn from_raw(response: &RawResponse) -> Self {
        Self::new(
            response.status,
            response.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            &response.body,
        )
    }

    fn into_service(
        self,
        scheme: &str,
        confidence: Confidence,
        method: DetectionTier,
    ) -> ServiceInfo {
        ServiceInfo::new(scheme.to_uppercase(), confidence, method)
            .with_version(self.server.clone())
            .with_detail("status", Some(self.status))
            .with_detail("server", self.server)
            .with_detail("location", self.location)
            .with_detail("powered_by", self.powered_by)
            .with_detail("title", self.title)
            .with_detail("framework", self.framework)
    }
}

fn detect_framework(haystack: &str) -> Option<&'static str> {
    FRAMEWORKS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| haystack.contains(n)))
        .map(|(name, _)| *name)
}

/// Text of the first `<title>` element, whitespace collapsed.
fn extract_title(body: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets valid for `body`.
    let lower = body.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;

    let title = body[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then(|| title.chars().take(MAX_TITLE_CHARS).collect())
}

/// A response read off a plain socket.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn parse(data: &[u8]) -> DetectResult<Self> {
        let text = String::from_utf8_lossy(data);
        let (head, body) = text
            .split_once("\r\n\r\n")
            .or_else(|| text.split_once("\n\n"))
            .unwrap_or((&*text, ""));

        let mut lines = head.lines();
        let status_line = lines.next().unwrap_or_default();
        let status = status_line
            .strip_prefix("HTTP/")
            .and_then(|rest| rest.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                DetectError::Malformed(format!("not an HTTP status line: {status_line:.40}"))
            })?;

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Ok(Self {
            status,
            headers,
            body: body.to_string(),
        })
    }
}

/// `GET path HTTP/1.0` over a plain socket.
pub(crate) async fn fetch_raw(ctx: &ProbeContext, path: &str) -> DetectResult<RawResponse> {
    let mut stream = connect(ctx).await?;
    let request = format!(
        "GET {path} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        host_header(ctx)
    );
    stream.write_all(request.as_bytes()).await?;

    let data = read_bounded(&mut stream, ctx.timeout, MAX_BODY_BYTES).await?;
    RawResponse::parse(&data)
}

#[cfg(feature = "enhanced")]
fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent(USER_AGENT)
        .no_proxy()
        .build()
}

#[cfg(feature = "enhanced")]
async fn fetch_with_client(
    client: &reqwest::Client,
    ctx: &ProbeContext,
    scheme: &str,
    budget: std::time::Duration,
) -> DetectResult<Page> {
    let url = format!("{scheme}://{}/", ctx.addr);
    let mut response = client
        .get(&url)
        .header(reqwest::header::HOST, host_header(ctx))
        .timeout(budget)
        .send()
        .await
        .map_err(|e| DetectError::Http(e.to_string()))?;

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    let mut body = Vec::new();
    while body.len() < MAX_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) if body.is_empty() => return Err(DetectError::Http(e.to_string())),
            Err(_) => break,
        }
    }
    let body = String::from_utf8_lossy(&body);

    Ok(Page::new(
        status,
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        &body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn serve(response: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response).await;
                });
            }
        });
        addr
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><HEAD><Title lang=en>\n  Welcome   home </title>").as_deref(),
            Some("Welcome home")
        );
        assert_eq!(extract_title("<title></title>"), None);
        assert_eq!(extract_title("no markup"), None);
        let long = format!("<title>{}</title>", "x".repeat(80));
        assert_eq!(extract_title(&long).unwrap().len(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_detect_framework() {
        assert_eq!(detect_framework("set-cookie: csrftoken=abc"), Some("Django"));
        assert_eq!(detect_framework("server: werkzeug/3.0.1"), Some("Flask"));
        assert_eq!(detect_framework("plain page"), None);
    }

    #[test]
    fn test_parse_raw_response() {
        let raw = b"HTTP/1.1 301 Moved Permanently\r\nServer: nginx/1.25.3\r\nLocation: https://example.com/\r\n\r\n<title>Moved</title>";
        let response = RawResponse::parse(raw).unwrap();
        assert_eq!(response.status, 301);
        assert_eq!(response.header("server"), Some("nginx/1.25.3"));
        assert_eq!(response.header("LOCATION"), Some("https://example.com/"));
        assert_eq!(response.body, "<title>Moved</title>");

        assert!(matches!(
            RawResponse::parse(b"SSH-2.0-OpenSSH\r\n"),
            Err(DetectError::Malformed(_))
        ));
    }

    #[test]
    fn test_schemes_for_port() {
        assert_eq!(schemes_for(443), &["https", "http"]);
        assert_eq!(schemes_for(8080), &["http"]);
    }

    #[tokio::test]
    async fn test_basic_detection() {
        let addr = serve(
            b"HTTP/1.0 200 OK\r\nServer: Werkzeug/3.0.1 Python/3.12\r\n\r\n<title>Dashboard</title>",
        )
        .await;
        let ctx = ProbeContext::new(addr, "127.0.0.1", Duration::from_millis(500));

        let info = HttpDetector::new(DetectionTier::Basic).detect(&ctx).await.unwrap();
        assert_eq!(info.name, "HTTP");
        assert_eq!(info.confidence, Confidence::Low);
        assert_eq!(info.method, DetectionTier::Basic);
        assert_eq!(info.detail["status"], "200");
        assert_eq!(info.detail["title"], "Dashboard");
        assert_eq!(info.detail["framework"], "Flask");
    }

    #[cfg(feature = "enhanced")]
    #[tokio::test]
    async fn test_enhanced_detection() {
        let addr =
            serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
        let ctx = ProbeContext::new(addr, "127.0.0.1", Duration::from_secs(2));

        let info = HttpDetector::new(DetectionTier::Enhanced).detect(&ctx).await.unwrap();
        assert_eq!(info.name, "HTTP");
        assert_eq!(info.method, DetectionTier::Enhanced);
        assert_eq!(info.confidence, Confidence::Medium);
    }
}
