//! Conversion between hyper messages and normalized messages.

use super::diagnostics::diagnostic_response;
use super::headers::{header_text, is_framing, HeaderBlockExt};
use super::loop_guard::LoopGuard;
use crate::message::{resolve_target, Charset, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::http::response::Parts;
use hyper::StatusCode;
use std::time::Instant;
use tracing::warn;

/// Read a client request, including its body, into a `Request`.
pub async fn request_from_hyper(
    req: hyper::Request<Incoming>,
    listener_protocol: &str,
    guard: &LoopGuard,
) -> Result<Request, hyper::Error> {
    let received = Instant::now();
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    // Absolute-form targets (`GET http://host/path`) come from clients that
    // treat us as a forward proxy.
    let raw_path = match (parts.uri.scheme_str(), parts.uri.authority()) {
        (Some(scheme), Some(authority)) => format!("/{scheme}://{authority}{}", parts.uri.path()),
        _ => parts.uri.path().to_string(),
    };
    let host_header = parts
        .headers
        .get(hyper::header::HOST)
        .and_then(|value| value.to_str().ok());
    let target = resolve_target(listener_protocol, &raw_path, host_header, |host| {
        guard.is_local_host(host)
    });

    Ok(Request::builder()
        .protocol(target.protocol)
        .host(target.host)
        .port(target.port)
        .path(target.path)
        .query(parts.uri.query().unwrap_or_default())
        .method(parts.method.as_str())
        .header(header_text(&parts.headers))
        .raw_content(body)
        .received(received)
        .build())
}

/// Read an upstream reply into a `Response`. The body is decoded with the
/// charset of its `Content-Type`, ISO-8859-1 by default, so bytes that are
/// not text come back out of [`response_to_hyper`] unchanged.
pub fn response_from_parts(parts: &Parts, body: &Bytes) -> Response {
    let header = header_text(&parts.headers);
    let content = Charset::from_header_block(&header).decode(body);
    Response {
        code: parts.status.as_u16().to_string(),
        reason: parts
            .status
            .canonical_reason()
            .unwrap_or_default()
            .to_string(),
        header,
        content,
        delay_ms: 0,
    }
}

/// Build the hyper response returned to the client.
///
/// A code hyper cannot express is replaced by a diagnostic. Framing headers
/// are dropped and recomputed for the body actually sent, which is encoded
/// with the charset the header block declares.
pub fn response_to_hyper(response: &Response) -> hyper::Response<Full<Bytes>> {
    let status = response.status().and_then(|code| StatusCode::from_u16(code).ok());
    let (status, response) = match status {
        Some(status) => (status, response.clone()),
        None => {
            warn!("Response has invalid status code '{}'", response.code);
            let diagnostic = diagnostic_response(format!(
                "Response has invalid status code: {}",
                response.code
            ));
            (StatusCode::IM_A_TEAPOT, diagnostic)
        }
    };

    let body = Charset::from_header_block(&response.header).encode(&response.content);
    let mut hyper_response = hyper::Response::new(Full::new(body));
    *hyper_response.status_mut() = status;
    hyper_response
        .headers_mut()
        .append_pairs(response.header_pairs(), |name| !is_framing(name));
    hyper_response
}
