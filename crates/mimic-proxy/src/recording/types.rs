//! Recordings: a request pattern with the responses to replay for it.

use super::pattern::RequestPattern;
use super::response::ResponseTemplate;
use crate::behaviors::{ResponseCounters, ResponseStrategy};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Recording {
    pub pattern: RequestPattern,
    pub responses: Vec<ResponseTemplate>,
    pub strategy: ResponseStrategy,
    /// Path relative to the recording directory, once one is allocated.
    pub filename: Option<String>,
    pub comment: String,
    /// Shared by every version of this recording so merges keep the counts.
    counters: Arc<ResponseCounters>,
}

/// What happened to a response merged into an existing recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    WeightIncreased,
}

impl Recording {
    /// Unsaved recording with fresh replay counters.
    pub fn new(pattern: RequestPattern, responses: Vec<ResponseTemplate>) -> Self {
        Self {
            pattern,
            responses,
            strategy: ResponseStrategy::default(),
            filename: None,
            comment: String::new(),
            counters: Arc::new(ResponseCounters::new()),
        }
    }

    /// Path relative to the recording directory.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// How `next_response` picks among the responses.
    pub fn with_strategy(mut self, strategy: ResponseStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Filename for log and diagnostic output.
    pub fn name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unsaved>")
    }

    /// Pick the next response template and count the replay.
    ///
    /// `None` when there are no responses or every weight is 0.
    pub fn next_response(&self) -> Option<&ResponseTemplate> {
        if self.responses.is_empty() {
            return None;
        }
        let counter = self.counters.advance();
        let weights: Vec<u64> = self.responses.iter().map(ResponseTemplate::weight).collect();
        let index = self
            .strategy
            .pick(&weights, counter, &mut rand::thread_rng())?;
        self.responses.get(index)
    }

    /// Add a freshly recorded response. A response equal to the current last
    /// one bumps that response's weight instead of being appended.
    pub fn merge_response(&mut self, response: ResponseTemplate) -> MergeOutcome {
        match self.responses.last_mut() {
            Some(last) if *last == response => {
                let weight = i64::try_from(last.weight()).unwrap_or(i64::MAX);
                last.set_weight(weight.saturating_add(1));
                MergeOutcome::WeightIncreased
            }
            _ => {
                self.responses.push(response);
                MergeOutcome::Appended
            }
        }
    }

    /// Sum of all response weights, saturating at `u64::MAX`.
    pub fn total_weight(&self) -> u64 {
        self.responses
            .iter()
            .fold(0u64, |sum, response| sum.saturating_add(response.weight()))
    }

    /// Replay counters shared by every version of this recording.
    pub fn counters(&self) -> &ResponseCounters {
        &self.counters
    }

    /// Lifetime count and the count since the last collection, which is reset.
    pub fn collect_counters(&self) -> (u64, u64) {
        (self.counters.total(), self.counters.take_current())
    }
}

impl fmt::Display for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} response(s), {}]",
            self.name(),
            self.responses.len(),
            self.strategy
        )
    }
}
