//! Proxy operating mode definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the proxy does with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Answer from recordings only
    #[default]
    Playback,
    /// Always forward, recording every exchange
    Record,
    /// Answer from recordings, forward and record on a miss
    PlaybackOrRecord,
    /// Always forward, never record
    Passthrough,
    /// Answer from recordings, forward without recording on a miss
    PlaybackOrPassthrough,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode '{0}', expected one of PLAYBACK, RECORD, PLAYBACK_OR_RECORD, PASSTHROUGH, PLAYBACK_OR_PASSTHROUGH")]
pub struct ModeParseError(pub String);

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Playback,
        Mode::Record,
        Mode::PlaybackOrRecord,
        Mode::Passthrough,
        Mode::PlaybackOrPassthrough,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Playback => "PLAYBACK",
            Mode::Record => "RECORD",
            Mode::PlaybackOrRecord => "PLAYBACK_OR_RECORD",
            Mode::Passthrough => "PASSTHROUGH",
            Mode::PlaybackOrPassthrough => "PLAYBACK_OR_PASSTHROUGH",
        }
    }

    /// Whether recordings are searched before anything else.
    pub fn searches_recordings(&self) -> bool {
        match self {
            Mode::Playback | Mode::PlaybackOrRecord | Mode::PlaybackOrPassthrough => true,
            Mode::Record | Mode::Passthrough => false,
        }
    }

    /// Whether the upstream is contacted, given whether playback found
    /// anything.
    pub fn contacts_upstream(&self, playback_hit: bool) -> bool {
        match self {
            Mode::Playback => false,
            Mode::Record | Mode::Passthrough => true,
            Mode::PlaybackOrRecord | Mode::PlaybackOrPassthrough => !playback_hit,
        }
    }

    /// Whether upstream replies are saved as recordings.
    pub fn records(&self) -> bool {
        match self {
            Mode::Record | Mode::PlaybackOrRecord => true,
            Mode::Playback | Mode::Passthrough | Mode::PlaybackOrPassthrough => false,
        }
    }

    /// Whether a reply to an already recorded request is merged into the
    /// existing recording rather than replacing it.
    pub fn merges_responses(&self) -> bool {
        match self {
            Mode::Record => true,
            Mode::Playback
            | Mode::PlaybackOrRecord
            | Mode::Passthrough
            | Mode::PlaybackOrPassthrough => false,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ModeParseError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("playback".parse::<Mode>().unwrap(), Mode::Playback);
        assert_eq!(
            "playback-or-record".parse::<Mode>().unwrap(),
            Mode::PlaybackOrRecord
        );
        assert_eq!(
            "PLAYBACK_OR_PASSTHROUGH".parse::<Mode>().unwrap(),
            Mode::PlaybackOrPassthrough
        );
        assert!("replay".parse::<Mode>().is_err());
    }

    #[test]
    fn test_mode_serde() {
        let mode: Mode = serde_yaml::from_str("PLAYBACK_OR_RECORD").unwrap();
        assert_eq!(mode, Mode::PlaybackOrRecord);
        assert_eq!(serde_yaml::to_string(&Mode::Record).unwrap().trim(), "RECORD");
    }

    #[test]
    fn test_mode_table() {
        // (mode, searches, contacts on hit, contacts on miss, records, merges)
        let table = [
            (Mode::Playback, true, false, false, false, false),
            (Mode::Record, false, true, true, true, true),
            (Mode::PlaybackOrRecord, true, false, true, true, false),
            (Mode::Passthrough, false, true, true, false, false),
            (Mode::PlaybackOrPassthrough, true, false, true, false, false),
        ];
        for (mode, searches, on_hit, on_miss, records, merges) in table {
            assert_eq!(mode.searches_recordings(), searches, "{mode}");
            assert_eq!(mode.contacts_upstream(true), on_hit, "{mode}");
            assert_eq!(mode.contacts_upstream(false), on_miss, "{mode}");
            assert_eq!(mode.records(), records, "{mode}");
            assert_eq!(mode.merges_responses(), merges, "{mode}");
        }
    }
}
