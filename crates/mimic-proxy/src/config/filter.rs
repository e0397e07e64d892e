//! Filter configuration.
//!
//! ```yaml
//! filters:
//!   - name: delay_response
//!     default:
//!       config: { strategy: FIXED, mean: 100 }
//!     groups:
//!       slow_search:
//!         request:
//!           path: ["/search.*"]
//!         config: { strategy: RANDOM, min: 500, max: 1500 }
//! ```

use crate::field::PatternField;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Response fields a filter group can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseField {
    Code,
    Header,
    Content,
}

impl fmt::Display for ResponseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseField::Code => "code",
            ResponseField::Header => "header",
            ResponseField::Content => "content",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Built-in filter to run
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Group applied when no named group matches
    #[serde(default)]
    pub default: FilterGroupConfig,
    /// Named groups, tried in name order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, FilterGroupConfig>,
}

fn default_enabled() -> bool {
    true
}

/// Patterns deciding whether a filter fires, plus its settings.
///
/// Each listed field must fully match at least one of its patterns.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterGroupConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request: BTreeMap<PatternField, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub response: BTreeMap<ResponseField, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_yaml::Value>,
}

impl FilterGroupConfig {
    pub fn has_patterns(&self) -> bool {
        !self.request.is_empty() || !self.response.is_empty()
    }
}
