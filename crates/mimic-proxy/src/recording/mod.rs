//! Recordings and their persistence.
//!
//! A recording pairs a request pattern with the response templates replayed
//! for requests matching it.
//!
//! # Module Structure
//!
//! - `pattern` - Request patterns and regex escaping
//! - `response` - Response templates with delay and weight settings
//! - `types` - The recording itself and response merging
//! - `mode` - Operating modes of the proxy
//! - `format` - The text file format
//! - `filename` - File names for new recordings
//! - `store` - File and in-memory recording stores

mod filename;
mod format;
mod mode;
mod pattern;
mod response;
mod store;
mod types;

pub use filename::{allocate_filename, EXTENSION};
pub use format::{decode, decode_with_warnings, encode, FormatError, FormatWarning};
pub use mode::{Mode, ModeParseError};
pub use pattern::{anchor, escape, strip_anchors, unescape, RequestPattern};
pub use response::ResponseTemplate;
pub use store::{
    load_all, FileRecordingStore, InMemoryRecordingStore, RecordingStore, StoreError,
};
pub use types::{MergeOutcome, Recording};
