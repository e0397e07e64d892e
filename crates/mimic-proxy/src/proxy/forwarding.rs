//! Forwarding requests to the real upstream.

use super::client::{create_http_client, HttpClient};
use super::convert::response_from_parts;
use super::headers::{is_framing, is_hop_by_hop, HeaderBlockExt};
use super::loop_guard::{LoopDetected, LoopGuard};
use crate::config::UpstreamConfig;
use crate::message::{Request, Response};
use crate::metrics;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, HOST};
use hyper::{Method, Uri};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Loop(#[from] LoopDetected),

    #[error("Request has no target host")]
    NoTarget,

    #[error("Invalid upstream target '{0}'")]
    InvalidTarget(String),

    #[error("Upstream request to {target} failed: {message}")]
    Connect { target: String, message: String },

    #[error("Upstream request to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },
}

/// Where forwarded requests go.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, UpstreamError>;
}

/// Upstream backed by the shared hyper client.
pub struct HyperUpstream {
    client: HttpClient,
    guard: Arc<LoopGuard>,
    force_https: bool,
    request_timeout: Duration,
}

/// Methods whose body is not forwarded.
const BODILESS_METHODS: [&str; 3] = ["GET", "HEAD", "DELETE"];

impl HyperUpstream {
    pub fn new(config: &UpstreamConfig, guard: Arc<LoopGuard>) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_http_client(config)?,
            guard,
            force_https: config.force_https,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// Scheme, host and port a request is sent to.
    fn target(&self, request: &Request) -> Result<(String, String, u16), UpstreamError> {
        let host = request.host.trim();
        if host.is_empty() {
            return Err(UpstreamError::NoTarget);
        }
        if self.force_https {
            return Ok(("https".to_string(), host.to_string(), 443));
        }
        let protocol = match request.protocol.trim().to_ascii_lowercase() {
            protocol if protocol.is_empty() => "http".to_string(),
            protocol => protocol,
        };
        let port = request.port.trim().parse::<u16>().unwrap_or_else(|_| {
            warn!("Invalid port '{}' for {}, using 80", request.port, host);
            80
        });
        Ok((protocol, host.to_string(), port))
    }

    fn build_request(
        &self,
        request: &Request,
        protocol: &str,
        host: &str,
        port: u16,
    ) -> Result<hyper::Request<Full<Bytes>>, UpstreamError> {
        let authority = match (host.contains(':') && !host.starts_with('['), is_default_port(protocol, port)) {
            (true, true) => format!("[{host}]"),
            (true, false) => format!("[{host}]:{port}"),
            (false, true) => host.to_string(),
            (false, false) => format!("{host}:{port}"),
        };
        let path = if request.path.is_empty() { "/" } else { request.path.as_str() };
        let url = if request.query.is_empty() {
            format!("{protocol}://{authority}{path}")
        } else {
            format!("{protocol}://{authority}{path}?{}", request.query)
        };
        let uri: Uri = url
            .parse()
            .map_err(|_| UpstreamError::InvalidTarget(url.clone()))?;
        let method = Method::from_bytes(request.method.trim().as_bytes())
            .map_err(|_| UpstreamError::InvalidTarget(format!("{} {url}", request.method)))?;

        let body = if BODILESS_METHODS.contains(&method.as_str()) {
            Bytes::new()
        } else {
            request.raw_content.clone()
        };

        let mut upstream_req = hyper::Request::new(Full::new(body));
        *upstream_req.method_mut() = method;
        *upstream_req.uri_mut() = uri;
        upstream_req.headers_mut().append_pairs(request.header_pairs(), |name| {
            !name.eq_ignore_ascii_case("host") && !is_hop_by_hop(name) && !is_framing(name)
        });
        let host_value = HeaderValue::from_str(&authority)
            .map_err(|_| UpstreamError::InvalidTarget(authority.clone()))?;
        upstream_req.headers_mut().insert(HOST, host_value);
        Ok(upstream_req)
    }
}

fn is_default_port(protocol: &str, port: u16) -> bool {
    matches!((protocol, port), ("http", 80) | ("https", 443))
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn send(&self, request: &Request) -> Result<Response, UpstreamError> {
        let (protocol, host, port) = self.target(request)?;
        self.guard.check(&host, port).await?;

        let upstream_req = self.build_request(request, &protocol, &host, port)?;
        let target = upstream_req.uri().to_string();
        let method = upstream_req.method().to_string();
        debug!("Forwarding {} {}", method, target);

        let started = Instant::now();
        let exchange = async {
            let reply = self.client.request(upstream_req).await.map_err(|e| e.to_string())?;
            let (parts, body) = reply.into_parts();
            let body = body.collect().await.map_err(|e| e.to_string())?.to_bytes();
            Ok::<_, String>(response_from_parts(&parts, &body))
        };
        let result = match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(UpstreamError::Connect {
                target: target.clone(),
                message,
            }),
            Err(_) => Err(UpstreamError::Timeout {
                target: target.clone(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_upstream_duration(&method, result.is_ok(), elapsed_ms);
        match &result {
            Ok(response) => debug!("{} {} answered {} in {:.1}ms", method, target, response.code, elapsed_ms),
            Err(e) => warn!("{}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(force_https: bool) -> HyperUpstream {
        let config = UpstreamConfig {
            force_https,
            tls_skip_verify: true,
            ..UpstreamConfig::default()
        };
        HyperUpstream::new(&config, Arc::new(LoopGuard::default())).unwrap()
    }

    fn request() -> Request {
        Request::builder()
            .protocol("http")
            .host("example.com")
            .port("8080")
            .path("/items")
            .query("a=1")
            .method("POST")
            .header("Connection: keep-alive\nContent-Length: 4\nHost: localhost:9000\nX-Id: 7")
            .content("body")
            .build()
    }

    #[tokio::test]
    async fn test_build_request() {
        let upstream = upstream(false);
        let request = request();
        let (protocol, host, port) = upstream.target(&request).unwrap();
        let built = upstream.build_request(&request, &protocol, &host, port).unwrap();
        assert_eq!(built.uri().to_string(), "http://example.com:8080/items?a=1");
        assert_eq!(built.method(), Method::POST);
        assert_eq!(built.headers().get(HOST).unwrap(), "example.com:8080");
        assert_eq!(built.headers().get("x-id").unwrap(), "7");
        assert!(built.headers().get("connection").is_none());
        assert!(built.headers().get("content-length").is_none());
    }

    #[tokio::test]
    async fn test_force_https_and_bad_port() {
        let mut request = request();
        request.port = "not-a-port".to_string();
        assert_eq!(
            upstream(false).target(&request).unwrap(),
            ("http".to_string(), "example.com".to_string(), 80)
        );
        assert_eq!(
            upstream(true).target(&request).unwrap(),
            ("https".to_string(), "example.com".to_string(), 443)
        );
    }

    #[tokio::test]
    async fn test_get_sends_no_body() {
        let upstream = upstream(false);
        let mut request = request();
        request.method = "GET".to_string();
        let built = upstream.build_request(&request, "http", "example.com", 80).unwrap();
        assert_eq!(built.uri().to_string(), "http://example.com/items?a=1");
        let body = built.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_missing_host_is_error() {
        let upstream = upstream(false);
        let request = Request::builder().path("/x").build();
        assert!(matches!(upstream.send(&request).await, Err(UpstreamError::NoTarget)));
    }

    #[tokio::test]
    async fn test_loop_is_rejected() {
        let guard = Arc::new(LoopGuard::default());
        guard.register("127.0.0.1:18089".parse().unwrap());
        let config = UpstreamConfig {
            tls_skip_verify: true,
            ..UpstreamConfig::default()
        };
        let upstream = HyperUpstream::new(&config, guard).unwrap();
        let request = Request::builder()
            .host("127.0.0.1")
            .port("18089")
            .path("/x")
            .build();
        assert!(matches!(upstream.send(&request).await, Err(UpstreamError::Loop(_))));
    }
}
