//! File names for new recordings.

use crate::message::Request;

/// Extension of recording files.
pub const EXTENSION: &str = "recording";

/// Allocate `host/path.NNN.recording` for a request, probing the counter
/// until `exists` reports a free name.
///
/// Host and path are reduced to `[A-Za-z0-9_.-]`, everything else becomes
/// `_` and leading underscores are dropped.
pub fn allocate_filename<F>(request: &Request, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    let directory = sanitize(&request.host);
    let mut stem = sanitize(&request.path);
    if !stem.is_empty() {
        stem.push('.');
    }
    (0u32..)
        .map(|count| {
            let name = format!("{stem}{count:03}.{EXTENSION}");
            if directory.is_empty() {
                name
            } else {
                format!("{directory}/{name}")
            }
        })
        .find(|candidate| !exists(candidate))
        .unwrap_or_default()
}

fn sanitize(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    replaced.trim_start_matches('_').to_string()
}
