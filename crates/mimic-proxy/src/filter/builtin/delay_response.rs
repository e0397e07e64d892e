//! Replace the recorded delay with one configured per group.

use super::{setting_str, setting_u64, DELAY_RESPONSE};
use crate::behaviors::DelayStrategy;
use crate::config::{FilterConfig, FilterGroupConfig};
use crate::filter::{Filter, FilterFactory};
use crate::message::Response;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Delay {
    strategy: DelayStrategy,
    min: u64,
    mean: u64,
    max: u64,
}

impl Delay {
    fn from_group(group: &FilterGroupConfig) -> anyhow::Result<Option<Self>> {
        let Some(strategy) = setting_str(group, "strategy") else {
            return Ok(None);
        };
        let delay = Self {
            strategy: strategy.parse()?,
            min: setting_u64(group, "min")?,
            mean: setting_u64(group, "mean")?,
            max: setting_u64(group, "max")?,
        };
        delay.strategy.check(delay.min, delay.mean, delay.max)?;
        Ok(Some(delay))
    }
}

/// Configured delays by group, `None` being the default group.
#[derive(Debug, Clone, Default)]
pub struct DelayResponseFactory {
    delays: Arc<HashMap<Option<String>, Delay>>,
}

impl DelayResponseFactory {
    /// Groups with unusable settings are logged and leave responses alone.
    pub fn from_config(config: &FilterConfig) -> Self {
        let groups = std::iter::once((None, &config.default))
            .chain(config.groups.iter().map(|(name, group)| (Some(name.clone()), group)));
        let mut delays = HashMap::new();
        for (name, group) in groups {
            match Delay::from_group(group) {
                Ok(Some(delay)) => {
                    delays.insert(name, delay);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "{}: group {} will not delay responses: {:#}",
                    DELAY_RESPONSE,
                    name.as_deref().unwrap_or("default"),
                    e
                ),
            }
        }
        Self {
            delays: Arc::new(delays),
        }
    }
}

impl FilterFactory for DelayResponseFactory {
    fn name(&self) -> &str {
        DELAY_RESPONSE
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(DelayResponse {
            delays: self.delays.clone(),
        })
    }
}

#[derive(Debug)]
pub struct DelayResponse {
    delays: Arc<HashMap<Option<String>, Delay>>,
}

impl Filter for DelayResponse {
    fn client_response(&mut self, response: &mut Response, group: Option<&str>) -> anyhow::Result<()> {
        let Some(delay) = self.delays.get(&group.map(str::to_string)) else {
            return Ok(());
        };
        response.delay_ms = delay.strategy.get_duration_ms(delay.min, delay.mean, delay.max);
        debug!("Response delay set to {}ms", response.delay_ms);
        Ok(())
    }
}
