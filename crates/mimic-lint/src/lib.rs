//! Recording linter for the Mimic proxy.
//!
//! Reads `.recording` files with the same decoder the proxy uses and reports
//! what would make a recording fail to load, never match, or replay
//! something other than intended. Proxy configuration files are checked
//! with [`lint_config`]. Usable as a library or through the
//! `mimic-lint` binary.
//!
//! # Example
//!
//! ```no_run
//! use mimic_lint::{lint_directory, LintOptions};
//! use std::path::Path;
//!
//! let result = lint_directory(Path::new("./recordings"), &LintOptions::default());
//! if result.has_errors() {
//!     eprintln!("Found {} errors", result.errors);
//! }
//! ```

mod config;
mod types;
mod validator;

use mimic_proxy::recording::{decode_with_warnings, RequestPattern, EXTENSION};
use std::path::{Path, PathBuf};

pub use config::lint_config;
pub use types::{LintIssue, LintOptions, LintResult, Severity};
pub use validator::{validate_code, validate_delay, validate_recording};

/// Lint a single recording file.
pub fn lint_file(path: &Path, options: &LintOptions) -> LintResult {
    match std::fs::read_to_string(path) {
        Ok(text) => lint_text(&text, path, options),
        Err(e) => {
            let mut result = LintResult::new();
            result.files_checked = 1;
            result.add_issue(LintIssue::error("E001", format!("Failed to read file: {e}"), path));
            result
        }
    }
}

/// Lint recording text as if it had been read from `path`.
pub fn lint_text(text: &str, path: &Path, options: &LintOptions) -> LintResult {
    let mut result = LintResult::new();
    result.files_checked = 1;
    match decode_with_warnings(text) {
        Ok((recording, warnings)) => {
            validate_recording(path, &recording, &warnings, &mut result, options)
        }
        Err(e) => result.add_issue(
            LintIssue::error("E002", format!("Unreadable recording: {e}"), path)
                .with_suggestion("Check the ---RECORDING--- and ---RESPONSE--- markers and that every block is closed"),
        ),
    }
    result
}

/// Lint every recording under `path`, recursively, and flag recordings
/// whose request patterns are identical.
pub fn lint_directory(path: &Path, options: &LintOptions) -> LintResult {
    let mut result = LintResult::new();
    let files = collect_recording_files(path);
    let mut patterns: Vec<(PathBuf, RequestPattern)> = Vec::new();

    for file in &files {
        let text = match std::fs::read_to_string(file) {
            Ok(text) => text,
            Err(_) => {
                result.merge(lint_file(file, options));
                continue;
            }
        };
        result.merge(lint_text(&text, file, options));
        if let Ok((recording, _)) = decode_with_warnings(&text) {
            patterns.push((file.clone(), recording.pattern));
        }
    }

    check_duplicate_patterns(&patterns, &mut result);
    result
}

/// Recording files below `path`, sorted. A file path is returned as is.
pub fn collect_recording_files(path: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if path.is_file() {
        files.push(path.to_path_buf());
    } else {
        collect_into(path, &mut files);
    }
    files.sort();
    files
}

fn collect_into(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            collect_into(&entry_path, files);
        } else if entry_path.extension().is_some_and(|ext| ext == EXTENSION) {
            files.push(entry_path);
        }
    }
}

/// Identical patterns always match together and make playback ambiguous.
fn check_duplicate_patterns(patterns: &[(PathBuf, RequestPattern)], result: &mut LintResult) {
    for (index, (file, pattern)) in patterns.iter().enumerate() {
        let Some((first, _)) = patterns[..index].iter().find(|(_, other)| other == pattern) else {
            continue;
        };
        result.add_issue(
            LintIssue::warning(
                "W004",
                format!("Request pattern is identical to {}", first.display()),
                file,
            )
            .with_suggestion("Merge the responses into one recording or delete one file"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_proxy::recording::{encode, Recording, ResponseTemplate};
    use mimic_proxy::{PatternField, Request};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, recording: &Recording) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, encode(recording)).unwrap();
        path
    }

    fn recorded(path: &str) -> Recording {
        let request = Request::builder().host("example.com").path(path).build();
        Recording::new(
            RequestPattern::from_request(&request),
            vec![ResponseTemplate::new("200", "", "ok")],
        )
    }

    #[test]
    fn test_lint_file_clean() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "a.000.recording", &recorded("/a"));
        let result = lint_file(&path, &LintOptions::default());
        assert_eq!(result.files_checked, 1);
        assert!(result.issues.is_empty(), "{:?}", result.issues);
        assert!(result.passed(true));
    }

    #[test]
    fn test_lint_file_missing() {
        let result = lint_file(Path::new("/nonexistent/x.recording"), &LintOptions::default());
        assert_eq!(result.codes(), vec!["E001"]);
    }

    #[test]
    fn test_lint_text_unreadable() {
        let result = lint_text("not a recording", Path::new("bad.recording"), &LintOptions::default());
        assert_eq!(result.codes(), vec!["E002"]);
        assert!(!result.passed(false));
    }

    #[test]
    fn test_lint_directory_recursive_and_duplicates() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "example.com/a.000.recording", &recorded("/a"));
        write(dir.path(), "example.com/a.001.recording", &recorded("/a"));
        write(dir.path(), "other/b.000.recording", &recorded("/b"));
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let result = lint_directory(dir.path(), &LintOptions::default());
        assert_eq!(result.files_checked, 3);
        assert_eq!(result.codes(), vec!["W004"]);
        assert!(result.issues[0].file.ends_with("example.com/a.001.recording"));
        assert!(result.passed(false));
        assert!(!result.passed(true));
    }

    #[test]
    fn test_lint_directory_reports_bad_patterns() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorded("/a");
        rec.pattern.set(PatternField::Query, "(unclosed");
        write(dir.path(), "bad.000.recording", &rec);
        let result = lint_directory(dir.path(), &LintOptions::default());
        assert_eq!(result.codes(), vec!["E003"]);
    }
}
