//! Checks applied to a decoded recording.

use crate::types::{LintIssue, LintOptions, LintResult};
use mimic_proxy::cache::compile_field_regex;
use mimic_proxy::recording::{FormatWarning, Recording, ResponseTemplate};
use mimic_proxy::template::Template;
use mimic_proxy::PatternField;
use std::collections::BTreeSet;
use std::path::Path;

/// Capture groups a pattern field offers to templates.
#[derive(Debug, Default)]
struct FieldGroups {
    names: BTreeSet<String>,
    /// Number of groups including group 0.
    len: usize,
}

impl FieldGroups {
    fn provides(&self, name: &str) -> bool {
        self.names.contains(name)
            || name
                .parse::<usize>()
                .is_ok_and(|index| index < self.len)
    }
}

/// Validate everything about one recording.
pub fn validate_recording(
    file: &Path,
    recording: &Recording,
    warnings: &[FormatWarning],
    result: &mut LintResult,
    options: &LintOptions,
) {
    for warning in warnings {
        result.add_issue(
            LintIssue::warning("W001", warning.message.clone(), file)
                .with_location(format!("line {}", warning.line)),
        );
    }

    let groups = check_patterns(file, recording, result);

    if recording.responses.is_empty() {
        result.add_issue(
            LintIssue::error("E004", "Recording has no responses", file)
                .with_suggestion("Add a ---RESPONSE--- block"),
        );
        return;
    }
    if recording.total_weight() == 0 {
        result.add_issue(
            LintIssue::error("E005", "Every response has WEIGHT=0, nothing can be replayed", file)
                .with_suggestion("Give at least one response a positive weight"),
        );
    }

    for (index, response) in recording.responses.iter().enumerate() {
        let location = format!("responses[{index}]");
        validate_delay(file, response, &location, result);
        validate_code(file, response, &location, result);
        if let (false, Some(groups)) = (options.skip_variable_check, &groups) {
            validate_variables(file, response, groups, &location, result);
        }
    }
}

/// Every pattern field must compile. Returns the capture groups of each
/// field when they all do.
fn check_patterns(
    file: &Path,
    recording: &Recording,
    result: &mut LintResult,
) -> Option<Vec<(PatternField, FieldGroups)>> {
    let mut groups = Vec::with_capacity(PatternField::ALL.len());
    let mut valid = true;
    for (field, source) in recording.pattern.sources() {
        match compile_field_regex(source) {
            Ok(regex) => groups.push((
                field,
                FieldGroups {
                    names: regex.capture_names().flatten().map(str::to_string).collect(),
                    len: regex.captures_len(),
                },
            )),
            Err(e) => {
                valid = false;
                result.add_issue(
                    LintIssue::error("E003", format!("Pattern does not compile: {e}"), file)
                        .with_location(format!("request.{}", field.as_str())),
                );
            }
        }
    }
    valid.then_some(groups)
}

pub fn validate_delay(file: &Path, response: &ResponseTemplate, location: &str, result: &mut LintResult) {
    let strategy = response.delay_strategy();
    if let Err(e) = strategy.check(response.delay_min(), response.delay_mean(), response.delay_max()) {
        result.add_issue(
            LintIssue::error("E006", e.to_string(), file)
                .with_location(location)
                .with_suggestion("Adjust DELAY_MIN, DELAY_MEAN and DELAY_MAX"),
        );
    }
}

/// Literal codes must be numbers hyper can send; unusual ones only warn.
pub fn validate_code(file: &Path, response: &ResponseTemplate, location: &str, result: &mut LintResult) {
    let code = response.code().trim();
    if Template::parse(code).variables().next().is_some() {
        return;
    }
    match code.parse::<u16>() {
        Ok(status) if (100..=599).contains(&status) => {}
        Ok(status) if (100..=999).contains(&status) => result.add_issue(
            LintIssue::warning("W002", format!("Unknown status code {status}"), file)
                .with_location(location),
        ),
        _ => result.add_issue(
            LintIssue::error("E007", format!("Invalid status code '{code}'"), file)
                .with_location(location)
                .with_suggestion("Use a three digit HTTP status code"),
        ),
    }
}

fn validate_variables(
    file: &Path,
    response: &ResponseTemplate,
    groups: &[(PatternField, FieldGroups)],
    location: &str,
    result: &mut LintResult,
) {
    let mut reported = BTreeSet::new();
    for text in [response.code(), response.header(), response.content()] {
        for variable in Template::parse(text).variables() {
            if resolves(variable, groups) || !reported.insert(variable.to_string()) {
                continue;
            }
            result.add_issue(
                LintIssue::warning(
                    "W003",
                    format!("Variable ${variable}$ names no capture group in the request pattern"),
                    file,
                )
                .with_location(location)
                .with_suggestion("It renders as \"null\"; add a named group or escape the $ as $$"),
            );
        }
    }
}

fn resolves(variable: &str, groups: &[(PatternField, FieldGroups)]) -> bool {
    if let Some((prefix, name)) = variable.split_once(':').filter(|(prefix, _)| !prefix.is_empty()) {
        let Ok(field) = prefix.parse::<PatternField>() else {
            return false;
        };
        return groups
            .iter()
            .any(|(candidate, groups)| *candidate == field && groups.provides(name));
    }
    groups.iter().any(|(_, groups)| groups.provides(variable))
}
