//! Normalized request and request-target resolution.

use crate::field::PatternField;
use bytes::Bytes;
use hyper::Uri;
use std::fmt;
use std::time::Instant;
use tracing::warn;

/// Header never taken into the matchable header block. The proxy negotiates
/// its own encodings with the upstream.
const IGNORED_HEADER: &str = "accept-encoding";

/// A request reduced to the eight matchable string fields.
#[derive(Debug, Clone)]
pub struct Request {
    pub protocol: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub query: String,
    pub method: String,
    pub header: String,
    pub content: String,
    /// Body exactly as received, forwarded upstream untouched.
    pub raw_content: Bytes,
    pub received: Instant,
}

impl Default for Request {
    /// A request with every field empty.
    fn default() -> Self {
        Self {
            protocol: String::new(),
            host: String::new(),
            port: String::new(),
            path: String::new(),
            query: String::new(),
            method: String::new(),
            header: String::new(),
            content: String::new(),
            raw_content: Bytes::new(),
            received: Instant::now(),
        }
    }
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    pub fn field_mut(&mut self, field: PatternField) -> &mut String {
        match field {
            PatternField::Protocol => &mut self.protocol,
            PatternField::Host => &mut self.host,
            PatternField::Port => &mut self.port,
            PatternField::Path => &mut self.path,
            PatternField::Query => &mut self.query,
            PatternField::Method => &mut self.method,
            PatternField::Header => &mut self.header,
            PatternField::Content => &mut self.content,
        }
    }

    /// Headers as `(name, value)` pairs parsed back out of the header block.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header.lines().filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim(), value.trim_start()))
        })
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.host == other.host
            && self.port == other.port
            && self.path == other.path
            && self.query == other.query
            && self.method == other.method
            && self.header == other.header
            && self.content == other.content
    }
}

impl Eq for Request {}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}?{} [{}] [HEADER: {} characters] [CONTENT: {} characters]",
            self.protocol,
            self.host,
            self.port,
            self.path,
            self.query,
            self.method,
            self.header.len(),
            self.content.len()
        )
    }
}

/// Builder used by the listener conversion and by tests.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            request: Request {
                protocol: "http".to_string(),
                host: String::new(),
                port: "80".to_string(),
                path: "/".to_string(),
                query: String::new(),
                method: "GET".to_string(),
                header: String::new(),
                content: String::new(),
                raw_content: Bytes::new(),
                received: Instant::now(),
            },
        }
    }
}

impl RequestBuilder {
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.request.protocol = protocol.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.request.host = host.into();
        self
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.request.port = port.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.request.path = path.into();
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.request.query = query.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = method.into();
        self
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.request.header = header.into();
        self
    }

    /// Sets both the normalized content and the raw body.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.request.raw_content = Bytes::from(content.clone().into_bytes());
        self.request.content = normalize_content(&content);
        self
    }

    pub fn raw_content(mut self, raw: Bytes) -> Self {
        self.request.content = normalize_content(&String::from_utf8_lossy(&raw));
        self.request.raw_content = raw;
        self
    }

    pub fn received(mut self, received: Instant) -> Self {
        self.request.received = received;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

/// Build the sorted `Key: value` header block, one header per line.
/// Repeated headers keep one line per occurrence.
pub fn header_block<I, K, V>(headers: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut lines: Vec<String> = headers
        .into_iter()
        .filter(|(name, _)| !name.as_ref().eq_ignore_ascii_case(IGNORED_HEADER))
        .map(|(name, value)| format!("{}: {}", name.as_ref(), value.as_ref()))
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Windows line endings are folded so recordings match across clients.
pub fn normalize_content(content: &str) -> String {
    content.replace("\r\n", "\n")
}

/// Protocol, host, port and path a request is aimed at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub protocol: String,
    pub host: String,
    pub port: String,
    pub path: String,
}

/// Work out where a request is headed.
///
/// Clients address the proxy either with the upstream URL embedded in the
/// path (`/http://host:port/path`) or transparently through a rewritten
/// `Host` header. The `Host` header is only trusted when `is_local` says it
/// does not name the proxy itself; otherwise protocol, host and port stay
/// empty and the raw path is kept.
pub fn resolve_target<F>(
    listener_protocol: &str,
    raw_path: &str,
    host_header: Option<&str>,
    is_local: F,
) -> ResolvedTarget
where
    F: Fn(&str) -> bool,
{
    let embedded = restore_scheme_slash(raw_path.strip_prefix('/').unwrap_or(raw_path));
    let url = if embedded.contains("://") {
        Some(embedded)
    } else {
        host_header
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .filter(|host| !is_local(host_without_port(host)))
            .map(|host| format!("{listener_protocol}://{host}{raw_path}"))
    };

    let uri = url.and_then(|url| match url.parse::<Uri>() {
        Ok(uri) if uri.host().is_some() => Some(uri),
        Ok(_) | Err(_) => {
            warn!("Couldn't parse request target URL: {}", url);
            None
        }
    });

    match uri {
        Some(uri) => {
            let protocol = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();
            let port = match uri.port_u16() {
                Some(port) => port.to_string(),
                None if protocol == "https" => "443".to_string(),
                None => "80".to_string(),
            };
            ResolvedTarget {
                host: uri.host().unwrap_or_default().to_string(),
                port,
                path: uri.path().to_string(),
                protocol,
            }
        }
        None => ResolvedTarget {
            path: raw_path.to_string(),
            ..ResolvedTarget::default()
        },
    }
}

/// Some clients and intermediaries collapse `//` in paths, turning
/// `/http://host` into `/http:/host`.
fn restore_scheme_slash(path: &str) -> String {
    for scheme in ["http:/", "https:/"] {
        if let Some(rest) = path.strip_prefix(scheme) {
            if !rest.starts_with('/') {
                return format!("{scheme}/{rest}");
            }
        }
    }
    path.to_string()
}

/// Strip a trailing `:port` from a `Host` header value.
pub(crate) fn host_without_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port))
            if !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (!name.contains(':') || name.ends_with(']')) =>
        {
            name
        }
        _ => host,
    }
}
