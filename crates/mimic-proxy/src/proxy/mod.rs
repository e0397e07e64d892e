//! Proxy module.
//!
//! Ties the matching core to the network:
//! - Deciding per request between replay, forwarding and recording
//! - Forwarding to the real upstream over HTTP or HTTPS
//! - Refusing forwards that would loop back into the proxy
//! - Serving clients over HTTP/1.1, optionally behind TLS
//!
//! # Module Structure
//!
//! - `handler` - The `Simulator` and its per-request decision procedure
//! - `forwarding` - `Upstream` trait and the hyper-backed implementation
//! - `loop_guard` - Listening-address bookkeeping for loop prevention
//! - `diagnostics` - 418 responses explaining why nothing better was found
//! - `convert` - hyper messages to and from normalized messages
//! - `headers` - Header block helpers
//! - `server` - ProxyServer accept loop and the metrics endpoint
//! - `client` - HTTP client creation and configuration
//! - `tls` - TLS utilities and certificate handling
//! - `network` - Network listener utilities (SO_REUSEPORT)

mod client;
mod convert;
mod diagnostics;
mod forwarding;
mod handler;
mod headers;
mod loop_guard;
mod network;
mod server;
mod tls;

pub use client::{create_http_client, HttpClient};
pub use convert::{request_from_hyper, response_from_parts, response_to_hyper};
pub use diagnostics::{diagnostic_response, is_diagnostic, DIAGNOSTIC_CODE};
pub use forwarding::{HyperUpstream, Upstream, UpstreamError};
pub use handler::Simulator;
pub use loop_guard::{LoopDetected, LoopGuard};
pub use network::create_reusable_listener;
pub use server::{run_metrics_server, ProxyServer};
