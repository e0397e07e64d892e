//! Hosts allowed through loop prevention.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ManagementConfig {
    /// Host names that may be forwarded to even when they resolve to one of
    /// the proxy's own listening addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}
