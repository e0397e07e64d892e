//! Per-request filter instances.

use super::registry::FilterSet;
use super::Filter;
use crate::message::{Request, Response};
use crate::metrics;
use crate::recording::Recording;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    ClientRequest,
    ServerRequest,
    ServerResponse,
    NewRecording,
    ClientResponse,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::ClientRequest => "client_request",
            Hook::ServerRequest => "server_request",
            Hook::ServerResponse => "server_response",
            Hook::NewRecording => "new_recording",
            Hook::ClientResponse => "client_response",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct GateState {
    request_checked: bool,
    response_checked: bool,
    /// Group that fired; `Some(None)` is the default group.
    fired: Option<Option<String>>,
}

struct Instance {
    filter: Box<dyn Filter>,
    gate: GateState,
}

/// The filters of one request, created from the filter set active when the
/// request arrived.
pub struct FilterChain {
    set: Arc<FilterSet>,
    instances: Vec<Instance>,
}

impl FilterChain {
    pub(super) fn new(set: Arc<FilterSet>) -> Self {
        let instances = set
            .filters()
            .iter()
            .map(|active| Instance {
                filter: active.factory().create(),
                gate: GateState::default(),
            })
            .collect();
        Self { set, instances }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn client_request(&mut self, request: &mut Request) {
        self.request_hook(Hook::ClientRequest, request);
    }

    pub fn server_request(&mut self, request: &mut Request) {
        self.request_hook(Hook::ServerRequest, request);
    }

    pub fn server_response(&mut self, response: &mut Response) {
        self.response_hook(Hook::ServerResponse, response);
    }

    pub fn client_response(&mut self, response: &mut Response) {
        self.response_hook(Hook::ClientResponse, response);
    }

    /// Runs on every filter; groups do not apply to new recordings.
    pub fn new_recording(&mut self, recording: &mut Recording) {
        for (index, instance) in self.instances.iter_mut().enumerate() {
            let name = self.set.filters()[index].factory().name();
            let result = catch_unwind(AssertUnwindSafe(|| {
                instance.filter.new_recording(recording)
            }));
            report(name, Hook::NewRecording, result);
        }
    }

    fn request_hook(&mut self, hook: Hook, request: &mut Request) {
        for (index, instance) in self.instances.iter_mut().enumerate() {
            let active = &self.set.filters()[index];
            if !instance.gate.request_checked {
                instance.gate.request_checked = true;
                instance.gate.fired = active
                    .gates()
                    .match_request(request)
                    .map(|group| group.map(str::to_string));
            }
            let Some(group) = &instance.gate.fired else {
                continue;
            };
            debug!("Filter {} {} for group {:?}", active.factory().name(), hook, group);
            let group = group.as_deref();
            let filter = &mut instance.filter;
            let result = catch_unwind(AssertUnwindSafe(|| match hook {
                Hook::ServerRequest => filter.server_request(request, group),
                _ => filter.client_request(request, group),
            }));
            report(active.factory().name(), hook, result);
        }
    }

    fn response_hook(&mut self, hook: Hook, response: &mut Response) {
        for (index, instance) in self.instances.iter_mut().enumerate() {
            let active = &self.set.filters()[index];
            if instance.gate.fired.is_none() && !instance.gate.response_checked {
                instance.gate.response_checked = true;
                instance.gate.fired = active
                    .gates()
                    .match_response(response)
                    .map(|group| group.map(str::to_string));
            }
            let Some(group) = &instance.gate.fired else {
                continue;
            };
            debug!("Filter {} {} for group {:?}", active.factory().name(), hook, group);
            let group = group.as_deref();
            let filter = &mut instance.filter;
            let result = catch_unwind(AssertUnwindSafe(|| match hook {
                Hook::ServerResponse => filter.server_response(response, group),
                _ => filter.client_response(response, group),
            }));
            report(active.factory().name(), hook, result);
        }
    }
}

fn report(name: &str, hook: Hook, result: Result<anyhow::Result<()>, Box<dyn Any + Send>>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("Filter {} {} failed: {:#}", name, hook, e);
            metrics::record_filter_failure(name, hook.as_str());
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("Filter {} {} panicked: {}", name, hook, message);
            metrics::record_filter_failure(name, hook.as_str());
        }
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.instances.len())
            .finish()
    }
}
