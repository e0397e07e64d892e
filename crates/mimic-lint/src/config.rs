//! Checks for proxy configuration files.

use crate::types::{LintIssue, LintResult};
use mimic_proxy::cache::compile_field_regex;
use mimic_proxy::config::{Config, FilterGroupConfig};
use std::fmt::Display;
use std::path::Path;

/// Load a YAML config the way the proxy does and check filter patterns,
/// which the proxy only skips with a warning at runtime.
pub fn lint_config(path: &Path) -> LintResult {
    let mut result = LintResult::new();
    result.files_checked = 1;

    let config = match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            result.add_issue(
                LintIssue::error("E010", format!("Configuration rejected: {e}"), path)
                    .with_suggestion("The proxy refuses to start with this file"),
            );
            return result;
        }
    };

    for (index, filter) in config.filters.iter().enumerate() {
        let prefix = format!("filters[{index}]");
        check_group(path, &format!("{prefix}.default"), &filter.default, &mut result);
        for (name, group) in &filter.groups {
            let location = format!("{prefix}.groups.{name}");
            if !group.has_patterns() {
                result.add_issue(
                    LintIssue::warning("W010", format!("Group '{name}' has no patterns and never fires"), path)
                        .with_location(location.clone()),
                );
            }
            check_group(path, &location, group, &mut result);
        }
        if !filter.enabled {
            result.add_issue(
                LintIssue::warning("W011", format!("Filter '{}' is disabled", filter.name), path)
                    .with_location(prefix),
            );
        }
    }
    result
}

fn check_group(path: &Path, location: &str, group: &FilterGroupConfig, result: &mut LintResult) {
    for (field, patterns) in &group.request {
        check_patterns(path, &format!("{location}.request.{}", field.as_str().to_lowercase()), patterns, result);
    }
    for (field, patterns) in &group.response {
        check_patterns(path, &format!("{location}.response.{field}"), patterns, result);
    }
}

fn check_patterns(path: &Path, location: &str, patterns: &[String], result: &mut LintResult) {
    for pattern in patterns {
        if let Err(e) = compile_field_regex(&format!("^(?:{pattern})$")) {
            report_pattern(path, location, pattern, e, result);
        }
    }
}

fn report_pattern(path: &Path, location: &str, pattern: &str, error: impl Display, result: &mut LintResult) {
    result.add_issue(
        LintIssue::warning("W012", format!("Pattern '{pattern}' does not compile and is skipped: {error}"), path)
            .with_location(location),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn lint_yaml(yaml: &str) -> LintResult {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml).unwrap();
        lint_config(file.path())
    }

    #[test]
    fn test_valid_config() {
        let result = lint_yaml("listen:\n  port: 8080\nmode: PLAYBACK\n");
        assert!(result.issues.is_empty(), "{:?}", result.issues);
    }

    #[test]
    fn test_rejected_config() {
        let result = lint_yaml("filters:\n  - name: no_such_filter\n");
        assert_eq!(result.codes(), vec!["E010"]);
        let result = lint_yaml("mode: REPLAY\n");
        assert_eq!(result.codes(), vec!["E010"]);
    }

    #[test]
    fn test_filter_group_checks() {
        let yaml = r#"
filters:
  - name: delay_response
    enabled: false
    default:
      request:
        path: ["/ok.*"]
      config: { strategy: FIXED, mean: 10 }
    groups:
      broken:
        request:
          path: ["/search("]
      empty:
        config: { strategy: FIXED, mean: 10 }
"#;
        let result = lint_yaml(yaml);
        assert_eq!(result.codes(), vec!["W012", "W010", "W011"]);
        assert_eq!(
            result.issues[0].location.as_deref(),
            Some("filters[0].groups.broken.request.path")
        );
        assert!(!result.has_errors());
    }
}
