//! Generalize new recordings by swapping matched text for regular expressions.
//!
//! Settings live in the default group. Each key names a field, optionally
//! followed by a dot and a free label (`path`, `header.session`), and each
//! value is a regex, optionally followed by `;` and the text to put in place
//! of the match. `;;` stands for a literal `;` in the regex. Without a
//! replacement the regex itself goes into the pattern.
//!
//! Request fields are edited as literal text and escaped again afterwards,
//! except for the replacements. Response fields are templates and are edited
//! as they are.

use super::{expand_groups, AUTO_REGEX_NEW_RECORDING};
use crate::config::FilterConfig;
use crate::field::PatternField;
use crate::filter::{Filter, FilterFactory};
use crate::recording::{anchor, escape, strip_anchors, unescape, Recording};
use regex::{NoExpand, Regex};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponsePart {
    Code,
    Header,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Request(PatternField),
    Response(ResponsePart),
}

impl Target {
    fn parse(kind: &str) -> Option<Self> {
        let target = match kind {
            "protocol" => Target::Request(PatternField::Protocol),
            "host" => Target::Request(PatternField::Host),
            "port" => Target::Request(PatternField::Port),
            "path" => Target::Request(PatternField::Path),
            "query" => Target::Request(PatternField::Query),
            "method" => Target::Request(PatternField::Method),
            "header" => Target::Request(PatternField::Header),
            "content" => Target::Request(PatternField::Content),
            "response_code" => Target::Response(ResponsePart::Code),
            "response_header" => Target::Response(ResponsePart::Header),
            "response_content" => Target::Response(ResponsePart::Content),
            _ => return None,
        };
        Some(target)
    }
}

/// One configured regex and what replaces its matches.
#[derive(Debug, Clone)]
struct Rule {
    target: Target,
    regex: Regex,
    replacement: Option<String>,
}

impl Rule {
    /// Text written in place of a match.
    fn substitute(&self, captures: &regex::Captures<'_>) -> String {
        match &self.replacement {
            Some(replacement) => expand_groups(replacement, captures),
            None => self.regex.as_str().to_string(),
        }
    }
}

/// Split `regex;replacement`. The first run of an odd number of `;` holds the
/// separator as its last character; pairs before it are literal.
fn split_setting(value: &str) -> (String, Option<String>) {
    let bytes = value.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] != b';' {
            pos += 1;
            continue;
        }
        let start = pos;
        while pos < bytes.len() && bytes[pos] == b';' {
            pos += 1;
        }
        if start > 0 && (pos - start) % 2 == 1 {
            let regex = value[..pos - 1].replace(";;", ";");
            return (regex, Some(value[pos..].to_string()));
        }
    }
    (value.replace(";;", ";"), None)
}

#[derive(Debug, Clone, Default)]
pub struct AutoRegexNewRecordingFactory {
    rules: Arc<Vec<Rule>>,
}

impl AutoRegexNewRecordingFactory {
    /// Unknown keys and invalid regexes are logged and skipped.
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut rules = Vec::new();
        for (key, value) in &config.default.config {
            let kind = key.split_once('.').map_or(key.as_str(), |(kind, _)| kind);
            let Some(target) = Target::parse(kind) else {
                warn!("{}: unknown configuration key: {}", AUTO_REGEX_NEW_RECORDING, key);
                continue;
            };
            let Some(value) = value.as_str() else {
                warn!("{}: value of '{}' is not a string", AUTO_REGEX_NEW_RECORDING, key);
                continue;
            };
            let (source, replacement) = split_setting(value);
            match Regex::new(&source) {
                Ok(regex) => rules.push(Rule {
                    target,
                    regex,
                    replacement,
                }),
                Err(e) => warn!(
                    "{}: unable to parse regex '{}' for key '{}': {}",
                    AUTO_REGEX_NEW_RECORDING, value, key, e
                ),
            }
        }
        if rules.is_empty() {
            warn!("{}: no usable settings in the default group", AUTO_REGEX_NEW_RECORDING);
        }
        Self {
            rules: Arc::new(rules),
        }
    }

    fn rules_for(&self, target: Target) -> Vec<&Rule> {
        self.rules.iter().filter(|rule| rule.target == target).collect()
    }
}

impl FilterFactory for AutoRegexNewRecordingFactory {
    fn name(&self) -> &str {
        AUTO_REGEX_NEW_RECORDING
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(AutoRegexNewRecording {
            settings: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct AutoRegexNewRecording {
    settings: AutoRegexNewRecordingFactory,
}

impl Filter for AutoRegexNewRecording {
    fn new_recording(&mut self, recording: &mut Recording) -> anyhow::Result<()> {
        for field in PatternField::ALL {
            let rules = self.settings.rules_for(Target::Request(field));
            if rules.is_empty() {
                continue;
            }
            let current = recording.pattern.get(field);
            let replaced = if field == PatternField::Header {
                replace_lines(current, &rules)
            } else {
                anchor_once(&replace_spans(&unescape(strip_anchors(current)), &rules, escape))
            };
            if replaced != current {
                debug!("{} pattern generalized to {}", field, replaced);
                recording.pattern.set(field, replaced);
            }
        }

        for part in [ResponsePart::Code, ResponsePart::Header, ResponsePart::Content] {
            let rules = self.settings.rules_for(Target::Response(part));
            if rules.is_empty() {
                continue;
            }
            if rules.iter().any(|rule| rule.replacement.is_none()) {
                warn!("{}: response rule without replacement inserts its regex", AUTO_REGEX_NEW_RECORDING);
            }
            for template in &mut recording.responses {
                match part {
                    ResponsePart::Code => {
                        let code = replace_spans(template.code(), &rules, str::to_string);
                        template.set_code(code);
                    }
                    ResponsePart::Header => {
                        let header = replace_spans(template.header(), &rules, str::to_string);
                        template.set_header(header);
                    }
                    ResponsePart::Content => {
                        let content = replace_spans(template.content(), &rules, str::to_string);
                        template.set_content(content);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Put back `^` and `$` unless a replacement already supplied them.
fn anchor_once(text: &str) -> String {
    match (text.starts_with('^'), text.ends_with('$')) {
        (true, true) => text.to_string(),
        (true, false) => format!("{text}$"),
        (false, true) => format!("^{text}"),
        (false, false) => anchor(text),
    }
}

/// Substitute every non-empty match of every rule, earliest first, passing
/// the text between matches through `keep`. A match starting inside an
/// earlier one is dropped; on equal starts the earlier rule wins.
fn replace_spans(text: &str, rules: &[&Rule], keep: impl Fn(&str) -> String) -> String {
    let mut spans: Vec<(usize, usize, usize, String)> = Vec::new();
    for (order, rule) in rules.iter().enumerate() {
        for captures in rule.regex.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if whole.is_empty() {
                continue;
            }
            spans.push((whole.start(), order, whole.end(), rule.substitute(&captures)));
        }
    }
    spans.sort_by_key(|(start, order, _, _)| (*start, *order));

    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for (start, _, end, substitute) in spans {
        if start < last_end {
            continue;
        }
        out.push_str(&keep(&text[last_end..start]));
        out.push_str(&substitute);
        last_end = end;
    }
    out.push_str(&keep(&text[last_end..]));
    out
}

/// Header patterns are edited per line. Replaced lines keep their regex
/// text, the others are escaped, and lines a rule emptied are dropped.
fn replace_lines(pattern: &str, rules: &[&Rule]) -> String {
    let text = unescape(strip_anchors(pattern));
    let lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            let mut current = line.to_string();
            let mut touched = false;
            for rule in rules {
                if !rule.regex.is_match(&current) {
                    continue;
                }
                current = match &rule.replacement {
                    Some(replacement) => rule
                        .regex
                        .replace_all(&current, |captures: &regex::Captures<'_>| {
                            expand_groups(replacement, captures)
                        })
                        .into_owned(),
                    None => rule
                        .regex
                        .replace_all(&current, NoExpand(&escape(rule.regex.as_str())))
                        .into_owned(),
                };
                touched = true;
            }
            if touched {
                current
            } else {
                escape(&current)
            }
        })
        .filter(|line| !line.is_empty())
        .collect();
    anchor_once(&lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::compile_field_regex;
    use crate::config::FilterGroupConfig;
    use crate::message::Request;
    use crate::recording::{RequestPattern, ResponseTemplate};
    use std::collections::BTreeMap;

    fn factory(settings: &[(&str, &str)]) -> AutoRegexNewRecordingFactory {
        AutoRegexNewRecordingFactory::from_config(&FilterConfig {
            name: AUTO_REGEX_NEW_RECORDING.to_string(),
            enabled: true,
            default: FilterGroupConfig {
                config: settings
                    .iter()
                    .map(|(key, value)| (key.to_string(), (*value).into()))
                    .collect(),
                ..FilterGroupConfig::default()
            },
            groups: BTreeMap::new(),
        })
    }

    fn recording(request: &Request, content: &str) -> Recording {
        Recording::new(
            RequestPattern::from_request(request),
            vec![ResponseTemplate::new("200", "", content)],
        )
    }

    #[test]
    fn test_split_setting() {
        assert_eq!(split_setting(r"\d+"), (r"\d+".to_string(), None));
        assert_eq!(
            split_setting(r"id=(\d+);id=$1"),
            (r"id=(\d+)".to_string(), Some("id=$1".to_string()))
        );
        assert_eq!(split_setting("a;;b"), ("a;b".to_string(), None));
        assert_eq!(
            split_setting("a;;;x"),
            ("a;".to_string(), Some("x".to_string()))
        );
    }

    #[test]
    fn test_path_match_becomes_regex() {
        let request = Request::builder().path("/users/1234/orders.json").build();
        let mut recording = recording(&request, "ok");
        factory(&[("path", r"\d+")])
            .create()
            .new_recording(&mut recording)
            .unwrap();

        let path = recording.pattern.get(PatternField::Path);
        assert_eq!(path, r"^/users/\d+/orders\.json$");
        let regex = compile_field_regex(path).unwrap();
        assert!(regex.is_match("/users/99/orders.json"));
        assert!(!regex.is_match("/users/x/orders.json"));
    }

    #[test]
    fn test_custom_replacement_with_groups() {
        let request = Request::builder().query("session=abc&page=2").build();
        let mut recording = recording(&request, "ok");
        factory(&[("query.session", "session=([a-z]+);session=[a-z]+")])
            .create()
            .new_recording(&mut recording)
            .unwrap();
        assert_eq!(recording.pattern.get(PatternField::Query), "^session=[a-z]+&page=2$");
    }

    #[test]
    fn test_header_lines_replaced_or_dropped() {
        let request = Request::builder()
            .header("Accept: */*\nX-Trace: 42\nCookie: a=b")
            .build();
        let mut recording = recording(&request, "ok");
        factory(&[
            ("header.cookie", "^Cookie: .*;"),
            ("header.trace", r"X-Trace: \d+;X-Trace: \d+"),
        ])
        .create()
        .new_recording(&mut recording)
        .unwrap();

        let header = recording.pattern.get(PatternField::Header);
        assert_eq!(header, "^Accept: \\*/\\*\nX-Trace: \\d+$");
        let regex = compile_field_regex(header).unwrap();
        assert!(regex.is_match("Accept: */*\nX-Trace: 7"));
    }

    #[test]
    fn test_response_content_uses_replacement() {
        let request = Request::builder().build();
        let mut recording = recording(&request, "{\"token\":\"abc123\"}");
        factory(&[("response_content", r#""token":"([a-z0-9]+)";"token":"$QUERY:token$""#)])
            .create()
            .new_recording(&mut recording)
            .unwrap();
        assert_eq!(
            recording.responses[0].content(),
            "{\"token\":\"$QUERY:token$\"}"
        );
    }

    #[test]
    fn test_unknown_key_and_bad_regex_skipped() {
        let factory = factory(&[("cookie", "x"), ("path", "(")]);
        assert!(factory.rules.is_empty());

        let request = Request::builder().path("/a").build();
        let mut recording = recording(&request, "ok");
        let before = recording.pattern.clone();
        factory.create().new_recording(&mut recording).unwrap();
        assert_eq!(recording.pattern, before);
    }
}
