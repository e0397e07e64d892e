//! Filters shipped with the proxy.
//!
//! - `delay_response` - Override the replay delay per group
//! - `set_recording_delay` - Store measured upstream latency in new recordings
//! - `auto_regex_new_recording` - Swap matched text in new recordings for regexes
//! - `keep_regex_new_recording` - Reduce new recording patterns to matched text
//! - `key_based_replace` - Fill responses with values mapped from a request key

mod auto_regex_new_recording;
mod delay_response;
mod keep_regex_new_recording;
mod key_based_replace;
mod set_recording_delay;

pub use auto_regex_new_recording::{AutoRegexNewRecording, AutoRegexNewRecordingFactory};
pub use delay_response::{DelayResponse, DelayResponseFactory};
pub use keep_regex_new_recording::{KeepRegexNewRecording, KeepRegexNewRecordingFactory};
pub use key_based_replace::{KeyBasedReplace, KeyBasedReplaceFactory};
pub use set_recording_delay::{SetRecordingDelay, SetRecordingDelayFactory};

use super::FilterFactory;
use crate::config::{FilterConfig, FilterGroupConfig};
use std::sync::Arc;

pub const DELAY_RESPONSE: &str = "delay_response";
pub const SET_RECORDING_DELAY: &str = "set_recording_delay";
pub const AUTO_REGEX_NEW_RECORDING: &str = "auto_regex_new_recording";
pub const KEEP_REGEX_NEW_RECORDING: &str = "keep_regex_new_recording";
pub const KEY_BASED_REPLACE: &str = "key_based_replace";

/// Names accepted in the `filters` configuration.
pub const NAMES: [&str; 5] = [
    DELAY_RESPONSE,
    SET_RECORDING_DELAY,
    AUTO_REGEX_NEW_RECORDING,
    KEEP_REGEX_NEW_RECORDING,
    KEY_BASED_REPLACE,
];

pub fn is_known(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Build the factory for a configured built-in filter.
pub fn build(config: &FilterConfig) -> anyhow::Result<Arc<dyn FilterFactory>> {
    match config.name.as_str() {
        DELAY_RESPONSE => Ok(Arc::new(DelayResponseFactory::from_config(config))),
        SET_RECORDING_DELAY => Ok(Arc::new(SetRecordingDelayFactory::from_config(config)?)),
        AUTO_REGEX_NEW_RECORDING => Ok(Arc::new(AutoRegexNewRecordingFactory::from_config(config))),
        KEEP_REGEX_NEW_RECORDING => Ok(Arc::new(KeepRegexNewRecordingFactory::from_config(config))),
        KEY_BASED_REPLACE => Ok(Arc::new(KeyBasedReplaceFactory::from_config(config))),
        other => anyhow::bail!("unknown filter '{}'", other),
    }
}

fn setting_str<'a>(group: &'a FilterGroupConfig, key: &str) -> Option<&'a str> {
    group.config.get(key).and_then(serde_yaml::Value::as_str)
}

fn setting_u64(group: &FilterGroupConfig, key: &str) -> anyhow::Result<u64> {
    match group.config.get(key) {
        None => Ok(0),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("'{}' must be a non-negative integer", key)),
    }
}

fn setting_f64(group: &FilterGroupConfig, key: &str, default: f64) -> anyhow::Result<f64> {
    match group.config.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .filter(|number| *number >= 0.0)
            .ok_or_else(|| anyhow::anyhow!("'{}' must be a non-negative number", key)),
    }
}

/// Put the text of capture group `N` wherever `replacement` says `$N`.
/// Groups that did not take part in the match expand to nothing; `$`
/// followed by anything but a digit is kept as it is.
fn expand_groups(replacement: &str, captures: &regex::Captures<'_>) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut rest = replacement;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        match after[..digits].parse::<usize>() {
            Ok(index) if index >= 1 && index < captures.len() => {
                out.push_str(captures.get(index).map_or("", |group| group.as_str()));
                rest = &after[digits..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
