// Library exports for the proxy binary, the linter and integration tests.

// ===== Matching and rendering core =====
pub mod behaviors;
pub mod cache;
pub mod field;
pub mod message;
pub mod recording;
pub mod template;

// ===== Request orchestration =====
pub mod filter;
pub mod proxy;
pub mod stats;

// ===== Ambient =====
pub mod config;
pub mod metrics;

pub use field::PatternField;
pub use message::{Request, Response};
