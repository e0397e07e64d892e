//! The eight request fields a recording matches on.
//!
//! The declaration order is the order the match tree descends in. Keeping it
//! fixed lets recordings that share a protocol, host and port share nodes.

use crate::message::Request;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternField {
    Protocol,
    Host,
    Port,
    Path,
    Query,
    Method,
    Header,
    Content,
}

impl PatternField {
    /// All fields in tree order.
    pub const ALL: [PatternField; 8] = [
        PatternField::Protocol,
        PatternField::Host,
        PatternField::Port,
        PatternField::Path,
        PatternField::Query,
        PatternField::Method,
        PatternField::Header,
        PatternField::Content,
    ];

    /// Upper-case name used in recording files and template references.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternField::Protocol => "PROTOCOL",
            PatternField::Host => "HOST",
            PatternField::Port => "PORT",
            PatternField::Path => "PATH",
            PatternField::Query => "QUERY",
            PatternField::Method => "METHOD",
            PatternField::Header => "HEADER",
            PatternField::Content => "CONTENT",
        }
    }

    /// Position of the field in tree order.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Literal value of this field in a captured request.
    pub fn value<'a>(&self, request: &'a Request) -> &'a str {
        match self {
            PatternField::Protocol => &request.protocol,
            PatternField::Host => &request.host,
            PatternField::Port => &request.port,
            PatternField::Path => &request.path,
            PatternField::Query => &request.query,
            PatternField::Method => &request.method,
            PatternField::Header => &request.header,
            PatternField::Content => &request.content,
        }
    }
}

impl fmt::Display for PatternField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for PatternField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternField::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}
