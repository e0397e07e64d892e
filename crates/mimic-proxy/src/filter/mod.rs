//! Filters: hooks that inspect and rewrite traffic as it passes through.
//!
//! A filter is configured once and instantiated for every request. Each
//! instance first decides through its groups whether it fires, then gets its
//! hooks called in this order:
//!
//! 1. `client_request` - every request, before recordings are searched
//! 2. `server_request` - only when the request is forwarded upstream
//! 3. `server_response` - only when the upstream answered
//! 4. `new_recording` - for every recording about to be saved, regardless of
//!    groups
//! 5. `client_response` - just before the response goes back to the client
//!
//! The request gate is checked on the first request hook. When it does not
//! fire, the response gate gets a chance on the first response hook.
//!
//! # Module Structure
//!
//! - `gate` - Group patterns deciding whether a filter fires
//! - `chain` - Per-request filter instances and hook dispatch
//! - `registry` - The active filter set, replaced wholesale on reload
//! - `builtin` - Filters shipped with the proxy

pub mod builtin;
mod chain;
mod gate;
mod registry;

pub use chain::{FilterChain, Hook};
pub use gate::{FilterGates, FilterGroup};
pub use registry::{ActiveFilter, FilterRegistry, FilterSet};

use crate::message::{Request, Response};
use crate::recording::Recording;

/// Hooks of one per-request filter instance. Every hook defaults to doing
/// nothing. `group` is the name of the group that fired, `None` for the
/// default group.
///
/// Errors and panics are logged by the caller and never abort the request.
pub trait Filter: Send {
    fn client_request(&mut self, _request: &mut Request, _group: Option<&str>) -> anyhow::Result<()> {
        Ok(())
    }

    fn server_request(&mut self, _request: &mut Request, _group: Option<&str>) -> anyhow::Result<()> {
        Ok(())
    }

    fn server_response(
        &mut self,
        _response: &mut Response,
        _group: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn new_recording(&mut self, _recording: &mut Recording) -> anyhow::Result<()> {
        Ok(())
    }

    fn client_response(
        &mut self,
        _response: &mut Response,
        _group: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Creates filter instances from a filter's parsed configuration.
pub trait FilterFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Box<dyn Filter>;
}
