//! The match tree that indexes recordings by request pattern.
//!
//! Each level of the tree holds the regex of one request field, in the fixed
//! field order, so recordings sharing a protocol, host and port share the
//! upper part of their branch. Leaves below the last field hold at most one
//! recording each.
//!
//! # Module Structure
//!
//! - `tree` - Copy-on-write trie with lock-free search
//! - `bindings` - Capture values collected while searching

mod bindings;
mod tree;

pub use bindings::{Bindings, FieldCapture};
pub use tree::{compile_field_regex, CacheError, MatchTree, SearchResult};
