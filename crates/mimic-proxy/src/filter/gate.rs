//! Deciding whether a filter fires for a request or response.

use crate::config::{FilterConfig, FilterGroupConfig, ResponseField};
use crate::field::PatternField;
use crate::message::{Request, Response};
use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Compiled patterns of one filter group.
#[derive(Debug, Clone)]
pub struct FilterGroup {
    name: Option<String>,
    request: Vec<(PatternField, Vec<Regex>)>,
    response: Vec<(ResponseField, Vec<Regex>)>,
}

impl FilterGroup {
    fn compile(filter: &str, name: Option<&str>, config: &FilterGroupConfig) -> Self {
        let label = name.unwrap_or("default");
        let request = config
            .request
            .iter()
            .map(|(field, patterns)| (*field, compile_all(filter, label, field, patterns)))
            .collect();
        let response = config
            .response
            .iter()
            .map(|(field, patterns)| (*field, compile_all(filter, label, field, patterns)))
            .collect();
        Self {
            name: name.map(str::to_string),
            request,
            response,
        }
    }

    /// `None` for the default group.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn has_patterns(&self) -> bool {
        !self.request.is_empty() || !self.response.is_empty()
    }

    fn matches_request(&self, request: &Request) -> bool {
        if !self.has_patterns() {
            return self.name.is_none();
        }
        !self.request.is_empty()
            && self
                .request
                .iter()
                .all(|(field, regexes)| any_full_match(regexes, field.value(request)))
    }

    fn matches_response(&self, response: &Response) -> bool {
        if !self.has_patterns() {
            return self.name.is_none();
        }
        !self.response.is_empty()
            && self.response.iter().all(|(field, regexes)| {
                let value = match field {
                    ResponseField::Code => &response.code,
                    ResponseField::Header => &response.header,
                    ResponseField::Content => &response.content,
                };
                any_full_match(regexes, value)
            })
    }
}

fn compile_all(
    filter: &str,
    group: &str,
    field: &dyn std::fmt::Display,
    patterns: &[String],
) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            RegexBuilder::new(&format!("^(?:{pattern})$"))
                .dot_matches_new_line(true)
                .build()
                .map_err(|e| {
                    warn!(
                        "Filter {} group {}: ignoring invalid {} pattern '{}': {}",
                        filter, group, field, pattern, e
                    )
                })
                .ok()
        })
        .collect()
}

fn any_full_match(regexes: &[Regex], value: &str) -> bool {
    regexes.iter().any(|regex| regex.is_match(value))
}

/// The groups of one configured filter.
///
/// Named groups are tried in name order and the first whose patterns match
/// wins. Otherwise the default group applies; a default group without
/// patterns matches everything. A named group without request patterns never
/// matches a request.
#[derive(Debug, Clone)]
pub struct FilterGates {
    named: Vec<FilterGroup>,
    default: FilterGroup,
}

impl FilterGates {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            named: config
                .groups
                .iter()
                .map(|(name, group)| FilterGroup::compile(&config.name, Some(name), group))
                .collect(),
            default: FilterGroup::compile(&config.name, None, &config.default),
        }
    }

    /// Gates that fire for everything, in the default group.
    pub fn open() -> Self {
        Self {
            named: Vec::new(),
            default: FilterGroup::compile("", None, &FilterGroupConfig::default()),
        }
    }

    /// The group a request falls into, `Some(None)` being the default group.
    pub fn match_request(&self, request: &Request) -> Option<Option<&str>> {
        if let Some(group) = self.named.iter().find(|g| g.matches_request(request)) {
            return Some(group.name());
        }
        self.default.matches_request(request).then_some(None)
    }

    pub fn match_response(&self, response: &Response) -> Option<Option<&str>> {
        if let Some(group) = self.named.iter().find(|g| g.matches_response(response)) {
            return Some(group.name());
        }
        self.default.matches_response(response).then_some(None)
    }
}
