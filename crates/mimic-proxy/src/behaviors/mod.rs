//! Replay behaviors: how long to wait and which response to send next.
//!
//! # Supported Behaviors
//!
//! - `wait` - Delay sampling (none, fixed, random, normal, exponential)
//! - `cycler` - Weighted response selection (sequential or random) and the
//!   per-recording counters that drive it

mod cycler;
mod wait;

pub use cycler::{ResponseCounters, ResponseStrategy, UnknownResponseStrategy};
pub use wait::{DelayConfigError, DelayStrategy, UnknownDelayStrategy};
