//! Replay statistics.
//!
//! Every recording counts how often it was replayed, both since it was loaded
//! and since statistics were last collected. A snapshot gathers those counts
//! per recording and per path pattern.

use crate::cache::MatchTree;
use crate::field::PatternField;
use crate::recording::strip_anchors;
use std::collections::BTreeMap;
use std::fmt::Write;

const HEADER_LINE: &str =
    "# Filename, Total response count since loaded, Response count since last statistics";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingStats {
    pub filename: String,
    pub total: u64,
    pub current: u64,
}

/// Replay counts at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sorted by filename
    pub recordings: Vec<RecordingStats>,
    /// Lifetime replay counts keyed by path pattern without anchors
    pub paths: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// Read the counters without resetting anything.
    pub fn peek(tree: &MatchTree) -> Self {
        Self::gather(tree, false)
    }

    /// Read the counters and reset every "since last collection" count.
    pub fn collect(tree: &MatchTree) -> Self {
        Self::gather(tree, true)
    }

    fn gather(tree: &MatchTree, reset: bool) -> Self {
        let mut snapshot = Self::default();
        for recording in tree.recordings() {
            let (total, current) = if reset {
                recording.collect_counters()
            } else {
                (recording.counters().total(), recording.counters().current())
            };
            let path = strip_anchors(recording.pattern.get(PatternField::Path)).to_string();
            *snapshot.paths.entry(path).or_default() += total;
            snapshot.recordings.push(RecordingStats {
                filename: recording.name().to_string(),
                total,
                current,
            });
        }
        snapshot.recordings.sort_by(|a, b| a.filename.cmp(&b.filename));
        snapshot
    }

    /// Lifetime counts per recording.
    pub fn totals_per_recording(&self) -> BTreeMap<&str, u64> {
        self.recordings
            .iter()
            .map(|stats| (stats.filename.as_str(), stats.total))
            .collect()
    }

    pub fn total_replays(&self) -> u64 {
        self.recordings.iter().map(|stats| stats.total).sum()
    }

    /// One `filename, total, current` line per recording under a comment
    /// header.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(64 * (self.recordings.len() + 1));
        out.push_str(HEADER_LINE);
        out.push('\n');
        for stats in &self.recordings {
            let _ = writeln!(out, "{}, {}, {}", stats.filename, stats.total, stats.current);
        }
        out
    }
}

/// Zero the lifetime counters of every recording.
pub fn reset_totals(tree: &MatchTree) {
    for recording in tree.recordings() {
        recording.counters().reset_total();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Recording, RequestPattern, ResponseTemplate};

    fn tree() -> MatchTree {
        let tree = MatchTree::new();
        for (file, path, method) in [
            ("a.recording", "^/a$", "^GET$"),
            ("b.recording", "^/a$", "^POST$"),
            ("c.recording", "^/c$", "^GET$"),
        ] {
            let pattern = RequestPattern::default()
                .with(PatternField::Path, path)
                .with(PatternField::Method, method);
            let recording = Recording::new(pattern, vec![ResponseTemplate::new("200", "", "ok")])
                .with_filename(file);
            tree.insert(recording).unwrap();
        }
        tree
    }

    fn replay(tree: &MatchTree, file: &str, times: usize) {
        let recording = tree
            .recordings()
            .into_iter()
            .find(|r| r.name() == file)
            .unwrap();
        for _ in 0..times {
            recording.next_response();
        }
    }

    #[test]
    fn test_snapshot_counts() {
        let tree = tree();
        replay(&tree, "a.recording", 2);
        replay(&tree, "b.recording", 1);
        replay(&tree, "c.recording", 4);

        let snapshot = StatsSnapshot::peek(&tree);
        assert_eq!(snapshot.total_replays(), 7);
        assert_eq!(snapshot.paths.get("/a"), Some(&3));
        assert_eq!(snapshot.paths.get("/c"), Some(&4));
        assert_eq!(snapshot.totals_per_recording().get("c.recording"), Some(&4));
    }

    #[test]
    fn test_collect_resets_current() {
        let tree = tree();
        replay(&tree, "a.recording", 2);
        let first = StatsSnapshot::collect(&tree);
        assert_eq!(
            first.recordings[0],
            RecordingStats {
                filename: "a.recording".to_string(),
                total: 2,
                current: 2
            }
        );
        replay(&tree, "a.recording", 1);
        let second = StatsSnapshot::collect(&tree);
        assert_eq!(second.recordings[0].total, 3);
        assert_eq!(second.recordings[0].current, 1);
    }

    #[test]
    fn test_render() {
        let tree = tree();
        replay(&tree, "b.recording", 1);
        let text = StatsSnapshot::peek(&tree).render();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("# Filename"));
        assert_eq!(lines[1], "a.recording, 0, 0");
        assert_eq!(lines[2], "b.recording, 1, 1");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_reset_totals() {
        let tree = tree();
        replay(&tree, "a.recording", 5);
        reset_totals(&tree);
        assert_eq!(StatsSnapshot::peek(&tree).total_replays(), 0);
    }
}
