//! Reduce new recording patterns to the text that matters.
//!
//! Settings live in the default group: keys name a request field, optionally
//! followed by a dot and a free label, and values are regexes. A configured
//! field keeps only the text its regexes match, in order, with anything
//! allowed in between.

use super::KEEP_REGEX_NEW_RECORDING;
use crate::config::FilterConfig;
use crate::field::PatternField;
use crate::filter::{Filter, FilterFactory};
use crate::recording::{escape, strip_anchors, unescape, Recording};
use regex::Regex;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct KeepRegexNewRecordingFactory {
    rules: Arc<Vec<(PatternField, Regex)>>,
}

impl KeepRegexNewRecordingFactory {
    /// Unknown keys and invalid regexes are logged and skipped.
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut rules = Vec::new();
        for (key, value) in &config.default.config {
            let kind = key.split_once('.').map_or(key.as_str(), |(kind, _)| kind);
            let Ok(field) = PatternField::from_str(kind) else {
                warn!("{}: unknown configuration key: {}", KEEP_REGEX_NEW_RECORDING, key);
                continue;
            };
            let Some(source) = value.as_str() else {
                warn!("{}: value of '{}' is not a string", KEEP_REGEX_NEW_RECORDING, key);
                continue;
            };
            match Regex::new(source) {
                Ok(regex) => rules.push((field, regex)),
                Err(e) => warn!(
                    "{}: unable to parse regex '{}' for key '{}': {}",
                    KEEP_REGEX_NEW_RECORDING, source, key, e
                ),
            }
        }
        Self {
            rules: Arc::new(rules),
        }
    }
}

impl FilterFactory for KeepRegexNewRecordingFactory {
    fn name(&self) -> &str {
        KEEP_REGEX_NEW_RECORDING
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(KeepRegexNewRecording {
            rules: self.rules.clone(),
        })
    }
}

#[derive(Debug)]
pub struct KeepRegexNewRecording {
    rules: Arc<Vec<(PatternField, Regex)>>,
}

impl Filter for KeepRegexNewRecording {
    fn new_recording(&mut self, recording: &mut Recording) -> anyhow::Result<()> {
        for field in PatternField::ALL {
            let regexes: Vec<&Regex> = self
                .rules
                .iter()
                .filter(|(rule_field, _)| *rule_field == field)
                .map(|(_, regex)| regex)
                .collect();
            if regexes.is_empty() {
                continue;
            }
            let kept = keep_matches(recording.pattern.get(field), &regexes);
            debug!("{} pattern reduced to {}", field, kept);
            recording.pattern.set(field, kept);
        }
        Ok(())
    }
}

/// `^.*?` followed by every match, escaped and each trailed by `.*?`, then
/// `$`. Matches are ordered by start; a match overlapping an earlier one is
/// dropped. A field where nothing matches ends up matching anything.
fn keep_matches(pattern: &str, regexes: &[&Regex]) -> String {
    let text = unescape(strip_anchors(pattern));
    let haystack = text.as_str();
    let mut spans: Vec<(usize, usize)> = regexes
        .iter()
        .flat_map(|regex| haystack_matches(regex, haystack))
        .collect();
    spans.sort_unstable();

    let mut out = String::from("^.*?");
    let mut last_end = 0;
    for (start, end) in spans {
        if start < last_end || start == end {
            continue;
        }
        out.push_str(&escape(&text[start..end]));
        out.push_str(".*?");
        last_end = end;
    }
    out.push('$');
    out
}

fn haystack_matches(regex: &Regex, haystack: &str) -> Vec<(usize, usize)> {
    regex
        .find_iter(haystack)
        .map(|found| (found.start(), found.end()))
        .collect()
}
