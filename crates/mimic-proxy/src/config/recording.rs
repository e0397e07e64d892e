//! Recording directory and playback settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingsConfig {
    /// Directory holding `.recording` files, created on first save
    #[serde(default = "default_directory")]
    pub directory: String,
    /// When several recordings match, answer from the one with the longest
    /// pattern instead of returning a diagnostic
    #[serde(default)]
    pub allow_multiple_matching: bool,
    /// Log per-recording replay counts at this interval (0 = never)
    #[serde(default)]
    pub stats_interval_secs: u64,
}

fn default_directory() -> String {
    "recordings".to_string()
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            allow_multiple_matching: false,
            stats_interval_secs: 0,
        }
    }
}
