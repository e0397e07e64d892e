//! Responses the proxy makes up when it has nothing better to return.

use crate::message::Response;

/// Status used for every diagnostic response.
pub const DIAGNOSTIC_CODE: &str = "418";

const DIAGNOSTIC_HEADER: &str = "Content-Type: text/plain; charset=UTF-8\nServer: mimic";

/// A plain-text 418 explaining why no real response could be produced.
pub fn diagnostic_response(reason: impl AsRef<str>) -> Response {
    Response::new(
        DIAGNOSTIC_CODE,
        DIAGNOSTIC_HEADER,
        format!(
            "mimic was unable to find a response to your request or an internal error occurred.\n\nReason: {}",
            reason.as_ref()
        ),
    )
}

/// Whether `response` was produced by [`diagnostic_response`].
pub fn is_diagnostic(response: &Response) -> bool {
    response.code == DIAGNOSTIC_CODE && response.header == DIAGNOSTIC_HEADER
}
