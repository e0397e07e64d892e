//! The active filter set.

use super::builtin;
use super::chain::FilterChain;
use super::gate::FilterGates;
use super::FilterFactory;
use crate::config::FilterConfig;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A filter factory together with the groups that gate it.
#[derive(Clone)]
pub struct ActiveFilter {
    factory: Arc<dyn FilterFactory>,
    gates: FilterGates,
}

impl ActiveFilter {
    pub fn new(factory: Arc<dyn FilterFactory>, gates: FilterGates) -> Self {
        Self { factory, gates }
    }

    pub fn factory(&self) -> &dyn FilterFactory {
        self.factory.as_ref()
    }

    pub fn gates(&self) -> &FilterGates {
        &self.gates
    }
}

impl fmt::Debug for ActiveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveFilter")
            .field("name", &self.factory.name())
            .field("gates", &self.gates)
            .finish()
    }
}

/// Filters in the order their hooks run.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<ActiveFilter>,
}

impl FilterSet {
    pub fn new(filters: Vec<ActiveFilter>) -> Self {
        Self { filters }
    }

    /// Build the enabled built-in filters. Filters that fail to build are
    /// logged and left out.
    pub fn from_configs(configs: &[FilterConfig]) -> Self {
        let filters = configs
            .iter()
            .filter(|config| config.enabled)
            .filter_map(|config| match builtin::build(config) {
                Ok(factory) => Some(ActiveFilter::new(factory, FilterGates::from_config(config))),
                Err(e) => {
                    warn!("Filter {} disabled: {:#}", config.name, e);
                    None
                }
            })
            .collect();
        Self { filters }
    }

    pub fn filters(&self) -> &[ActiveFilter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Holds the filter set requests are served with. Reloading publishes a
/// complete new set; requests in flight keep the set they started with.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    active: ArcSwap<FilterSet>,
}

impl FilterRegistry {
    pub fn new(set: FilterSet) -> Self {
        Self {
            active: ArcSwap::from_pointee(set),
        }
    }

    pub fn from_configs(configs: &[FilterConfig]) -> Self {
        Self::new(FilterSet::from_configs(configs))
    }

    /// Replace the active filters with ones built from `configs`. Returns how
    /// many filters are now active.
    pub fn reload(&self, configs: &[FilterConfig]) -> usize {
        let set = FilterSet::from_configs(configs);
        let count = set.len();
        self.replace(set);
        info!("Reloaded filters, {} active", count);
        count
    }

    pub fn replace(&self, set: FilterSet) {
        self.active.store(Arc::new(set));
    }

    pub fn current(&self) -> Arc<FilterSet> {
        self.active.load_full()
    }

    /// Fresh filter instances for one request.
    pub fn chain(&self) -> FilterChain {
        FilterChain::new(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterGroupConfig;
    use std::collections::BTreeMap;

    fn config(name: &str, enabled: bool) -> FilterConfig {
        FilterConfig {
            name: name.to_string(),
            enabled,
            default: FilterGroupConfig::default(),
            groups: BTreeMap::new(),
        }
    }

    #[test]
    fn test_from_configs_skips_disabled_and_unknown() {
        let set = FilterSet::from_configs(&[
            config(builtin::DELAY_RESPONSE, true),
            config(builtin::SET_RECORDING_DELAY, false),
            config("missing", true),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.filters()[0].factory().name(), builtin::DELAY_RESPONSE);
    }

    #[test]
    fn test_reload_swaps_whole_set() {
        let registry = FilterRegistry::default();
        assert!(registry.current().is_empty());

        let before = registry.current();
        assert_eq!(
            registry.reload(&[
                config(builtin::DELAY_RESPONSE, true),
                config(builtin::SET_RECORDING_DELAY, true),
            ]),
            2
        );
        // a request holding the old set is unaffected
        assert!(before.is_empty());
        assert_eq!(registry.current().len(), 2);
        assert!(!registry.chain().is_empty());
    }
}
