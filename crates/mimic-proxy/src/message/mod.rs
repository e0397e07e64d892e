//! Normalized HTTP messages.
//!
//! Requests and responses are reduced to plain string fields before they are
//! matched or recorded. Header blocks are one `Key: value` per line, sorted, so
//! clients that shuffle header order still hit the same recording. Response
//! bodies are decoded with the charset their header block declares.
//!
//! # Module Structure
//!
//! - `charset` - Body text encoding
//! - `request` - Normalized request and request-target resolution
//! - `response` - Normalized response

mod charset;
mod request;
mod response;

pub use charset::Charset;
pub use request::{
    header_block, normalize_content, resolve_target, Request, RequestBuilder, ResolvedTarget,
};
pub use response::Response;
