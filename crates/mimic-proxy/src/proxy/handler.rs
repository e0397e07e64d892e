//! The per-request decision procedure.

use super::diagnostics::diagnostic_response;
use super::forwarding::Upstream;
use crate::cache::{MatchTree, SearchResult};
use crate::config::FilterConfig;
use crate::filter::{FilterChain, FilterRegistry};
use crate::message::{Request, Response};
use crate::metrics;
use crate::recording::{
    allocate_filename, load_all, Mode, ModeParseError, Recording, RecordingStore, RequestPattern,
    ResponseTemplate, StoreError,
};
use crate::stats::StatsSnapshot;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Answers requests from recordings, the upstream or both, depending on the
/// current mode.
pub struct Simulator {
    tree: Arc<MatchTree>,
    store: Arc<dyn RecordingStore>,
    upstream: Arc<dyn Upstream>,
    filters: Arc<FilterRegistry>,
    mode: RwLock<Mode>,
    allow_multiple_matching: AtomicBool,
    request_timeout: Duration,
    /// Serializes merge, filename allocation, save and insert of new
    /// recordings.
    record_lock: tokio::sync::Mutex<()>,
}

impl Simulator {
    pub fn new(
        tree: Arc<MatchTree>,
        store: Arc<dyn RecordingStore>,
        upstream: Arc<dyn Upstream>,
        filters: Arc<FilterRegistry>,
    ) -> Self {
        Self {
            tree,
            store,
            upstream,
            filters,
            mode: RwLock::new(Mode::default()),
            allow_multiple_matching: AtomicBool::new(false),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            record_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        *self.mode.write() = mode;
        self
    }

    pub fn with_allow_multiple_matching(self, allow: bool) -> Self {
        self.allow_multiple_matching.store(allow, Ordering::Relaxed);
        self
    }

    /// Upper bound on how long a request may take, including any replay
    /// delay.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: Mode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            info!("Mode changed from {} to {}", previous, mode);
        }
    }

    pub fn set_mode_named(&self, name: &str) -> Result<Mode, ModeParseError> {
        let mode = name.parse::<Mode>()?;
        self.set_mode(mode);
        Ok(mode)
    }

    pub fn allow_multiple_matching(&self) -> bool {
        self.allow_multiple_matching.load(Ordering::Relaxed)
    }

    pub fn set_allow_multiple_matching(&self, allow: bool) {
        self.allow_multiple_matching.store(allow, Ordering::Relaxed);
    }

    pub fn tree(&self) -> &Arc<MatchTree> {
        &self.tree
    }

    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }

    pub fn store(&self) -> &Arc<dyn RecordingStore> {
        &self.store
    }

    /// Swap in a new filter set. Requests already running keep the old one.
    pub fn reload_filters(&self, configs: &[FilterConfig]) -> usize {
        self.filters.reload(configs)
    }

    /// Replace the tree content with everything in the store.
    pub fn reload_recordings(&self) -> Result<usize, StoreError> {
        let recordings = load_all(self.store.as_ref())?;
        let len = self.tree.replace_all(recordings);
        metrics::set_recordings_loaded(len);
        Ok(len)
    }

    /// Replay counts, without resetting anything.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::peek(&self.tree)
    }

    /// Replay counts; resets the since-last-collection counters.
    pub fn collect_stats(&self) -> StatsSnapshot {
        StatsSnapshot::collect(&self.tree)
    }

    /// Produce the response for one client request. Never fails: every
    /// problem turns into a diagnostic response.
    pub async fn handle_request(&self, mut request: Request) -> Response {
        let mode = self.mode();
        let mut chain = self.filters.chain();

        chain.client_request(&mut request);

        let matches = if mode.searches_recordings() {
            self.tree.search(&request)
        } else {
            Vec::new()
        };

        let mut upstream_result = None;
        if mode.contacts_upstream(!matches.is_empty()) {
            chain.server_request(&mut request);
            let result = match self.upstream.send(&request).await {
                Ok(mut reply) => {
                    chain.server_response(&mut reply);
                    Ok(reply)
                }
                Err(e) => Err(e),
            };
            if let (true, Ok(reply)) = (mode.records(), &result) {
                self.record(&request, reply, &mut chain, mode).await;
            }
            upstream_result = Some(result);
        }

        let (mut response, outcome) = match upstream_result {
            Some(Err(e)) => (
                diagnostic_response(format!("Unable to connect to host: {e}")),
                "unreachable",
            ),
            Some(Ok(reply)) if mode.records() => (reply, "recorded"),
            Some(Ok(reply)) => (reply, "forwarded"),
            None => self.replay(&request, &matches),
        };

        chain.client_response(&mut response);
        metrics::record_request(mode.as_str(), outcome);
        debug!("{} answered {} ({})", request, response.code, outcome);

        self.delay(&request, &response, mode).await;
        response
    }

    fn replay(&self, request: &Request, matches: &[SearchResult]) -> (Response, &'static str) {
        let chosen = match matches {
            [] => {
                return (
                    diagnostic_response(format!("No recording matching request found: {request}")),
                    "not_found",
                )
            }
            [only] => only,
            [first, rest @ ..] => {
                if !self.allow_multiple_matching() {
                    let names: Vec<&str> = matches.iter().map(|m| m.recording.name()).collect();
                    warn!("{} recordings match {}", matches.len(), request);
                    return (
                        diagnostic_response(format!(
                            "Multiple recordings match request: {}",
                            names.join(", ")
                        )),
                        "ambiguous",
                    );
                }
                most_specific(first, rest)
            }
        };

        let recording = &chosen.recording;
        match recording.next_response() {
            Some(template) => {
                debug!("Replaying {}", recording);
                (template.render(&chosen.bindings), "replayed")
            }
            None => (
                diagnostic_response(format!(
                    "No response returned from matching recording ({}), either all responses in recording have weight set to 0 or there are no responses in the recording",
                    recording.name()
                )),
                "no_response",
            ),
        }
    }

    /// Turn an upstream exchange into a recording, merging it into an
    /// existing one when the mode asks for it.
    async fn record(&self, request: &Request, reply: &Response, chain: &mut FilterChain, mode: Mode) {
        let mut recording = Recording::new(
            RequestPattern::from_request(request),
            vec![ResponseTemplate::from_response(reply)],
        );
        chain.new_recording(&mut recording);

        let _guard = self.record_lock.lock().await;

        let existing = if mode.merges_responses() {
            self.tree.find_exact(&recording.pattern)
        } else {
            None
        };
        let merged = existing.is_some();
        let recording = match existing {
            Some(existing) => {
                let mut updated = (*existing).clone();
                for template in recording.responses {
                    let outcome = updated.merge_response(template);
                    debug!("Merged response into {}: {:?}", updated.name(), outcome);
                }
                updated
            }
            None => {
                let taken: HashSet<String> = self
                    .tree
                    .recordings()
                    .iter()
                    .filter_map(|r| r.filename.clone())
                    .collect();
                let source = recording.pattern.original().unwrap_or(request);
                let filename = allocate_filename(source, |candidate| {
                    taken.contains(candidate) || self.store.exists(candidate)
                });
                recording.with_filename(filename)
            }
        };

        let store = Arc::clone(&self.store);
        let to_save = recording.clone();
        let saved = match tokio::task::spawn_blocking(move || store.save(&to_save)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Failed to save recording {}: {}", recording.name(), e);
                false
            }
            Err(e) => {
                error!("Saving recording {} did not complete: {}", recording.name(), e);
                false
            }
        };

        let name = recording.name().to_string();
        match self.tree.insert(recording) {
            Ok(_) => info!(
                "{} recording {}",
                if merged { "Updated" } else { "Created" },
                name
            ),
            Err(e) => error!("Recording {} could not be indexed: {}", name, e),
        }
        metrics::record_recording_saved(merged, saved);
        metrics::set_recordings_loaded(self.tree.len());
    }

    /// Hold the response until its delay has passed since the request
    /// arrived, but never beyond the request deadline.
    async fn delay(&self, request: &Request, response: &Response, mode: Mode) {
        if response.delay_ms == 0 {
            return;
        }
        let target = Duration::from_millis(response.delay_ms);
        let spent = request.received.elapsed();
        let Some(remaining) = target.checked_sub(spent) else {
            return;
        };
        metrics::record_delay(mode.as_str(), response.delay_ms);
        let budget = self.request_timeout.saturating_sub(spent);
        if tokio::time::timeout(budget, tokio::time::sleep(remaining))
            .await
            .is_err()
        {
            debug!(
                "Delay of {}ms cut short by the {}ms request timeout",
                response.delay_ms,
                self.request_timeout.as_millis()
            );
        }
    }
}

/// First candidate with the longest combined pattern.
fn most_specific<'a>(first: &'a SearchResult, rest: &'a [SearchResult]) -> &'a SearchResult {
    rest.iter().fold(first, |best, candidate| {
        if candidate.recording.pattern.total_len() > best.recording.pattern.total_len() {
            candidate
        } else {
            best
        }
    })
}
