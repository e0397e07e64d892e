//! Header block helpers.
//!
//! Requests and responses carry their headers as a text block. These helpers
//! move headers between that block and hyper's `HeaderMap`.

use crate::message::header_block;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Headers that describe one connection and are never forwarded.
pub static HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

/// Headers recomputed from the actual body whenever a message is written.
pub static FRAMING: [&str; 2] = ["content-length", "transfer-encoding"];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|hop| hop.eq_ignore_ascii_case(name))
}

pub fn is_framing(name: &str) -> bool {
    FRAMING.iter().any(|framing| framing.eq_ignore_ascii_case(name))
}

/// Render a `HeaderMap` as a sorted header block. Non UTF-8 values are
/// decoded lossily.
pub fn header_text(headers: &HeaderMap) -> String {
    header_block(
        headers
            .iter()
            .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()))),
    )
}

/// Extension trait for copying header-block lines into a `HeaderMap`.
pub trait HeaderBlockExt {
    /// Append every `(name, value)` pair `keep` accepts. Invalid names or
    /// values are skipped. Returns how many headers were appended.
    fn append_pairs<'a, I, F>(&mut self, pairs: I, keep: F) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
        F: Fn(&str) -> bool;
}

impl HeaderBlockExt for HeaderMap {
    fn append_pairs<'a, I, F>(&mut self, pairs: I, keep: F) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
        F: Fn(&str) -> bool,
    {
        let mut appended = 0;
        for (name, value) in pairs {
            if !keep(name) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    self.append(name, value);
                    appended += 1;
                }
                _ => debug!("Skipping invalid header '{}'", name),
            }
        }
        appended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_classification() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(is_framing("Content-Length"));
        assert!(is_framing("transfer-encoding"));
        assert!(!is_framing("host"));
    }

    #[test]
    fn test_header_text_sorted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-b", HeaderValue::from_static("2"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        assert_eq!(header_text(&headers), "content-type: text/plain\nx-b: 2");
    }

    #[test]
    fn test_append_pairs_skips_invalid_and_filtered() {
        let mut headers = HeaderMap::new();
        let appended = headers.append_pairs(
            vec![
                ("x-ok", "yes"),
                ("bad header", "v"),
                ("content-length", "12"),
                ("x-multi", "a"),
                ("x-multi", "b"),
            ],
            |name| !is_framing(name),
        );
        assert_eq!(appended, 3);
        assert_eq!(headers.get("x-ok").unwrap(), "yes");
        assert!(headers.get("content-length").is_none());
        assert_eq!(headers.get_all("x-multi").iter().count(), 2);
    }
}
