//! Store the measured upstream latency as the delay of new recordings.

use super::{setting_f64, setting_str, SET_RECORDING_DELAY};
use crate::behaviors::DelayStrategy;
use crate::config::FilterConfig;
use crate::filter::{Filter, FilterFactory};
use crate::message::{Request, Response};
use crate::recording::Recording;
use std::time::{Duration, Instant};
use tracing::debug;

/// Strategy and multipliers applied to the measured latency. Settings are
/// read from the default group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetRecordingDelayFactory {
    strategy: DelayStrategy,
    min: f64,
    mean: f64,
    max: f64,
}

impl SetRecordingDelayFactory {
    pub fn from_config(config: &FilterConfig) -> anyhow::Result<Self> {
        let settings = &config.default;
        let strategy = match setting_str(settings, "strategy") {
            Some(strategy) => strategy.parse()?,
            None => anyhow::bail!("'strategy' is required"),
        };
        let factory = Self {
            strategy,
            min: setting_f64(settings, "min", 1.0)?,
            mean: setting_f64(settings, "mean", 1.0)?,
            max: setting_f64(settings, "max", 1.0)?,
        };
        if factory.min > factory.max {
            anyhow::bail!("'min' multiplier must not exceed 'max'");
        }
        Ok(factory)
    }
}

impl FilterFactory for SetRecordingDelayFactory {
    fn name(&self) -> &str {
        SET_RECORDING_DELAY
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(SetRecordingDelay {
            settings: *self,
            sent: None,
            latency: None,
        })
    }
}

#[derive(Debug)]
pub struct SetRecordingDelay {
    settings: SetRecordingDelayFactory,
    sent: Option<Instant>,
    latency: Option<Duration>,
}

impl SetRecordingDelay {
    fn scaled(&self, latency_ms: f64, multiplier: f64) -> i64 {
        (latency_ms * multiplier) as i64
    }
}

impl Filter for SetRecordingDelay {
    fn server_request(&mut self, _request: &mut Request, _group: Option<&str>) -> anyhow::Result<()> {
        self.sent = Some(Instant::now());
        Ok(())
    }

    fn server_response(&mut self, _response: &mut Response, _group: Option<&str>) -> anyhow::Result<()> {
        self.latency = self.sent.map(|sent| sent.elapsed());
        Ok(())
    }

    fn new_recording(&mut self, recording: &mut Recording) -> anyhow::Result<()> {
        let Some(latency) = self.latency else {
            debug!("No upstream latency measured for {}", recording.name());
            return Ok(());
        };
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let (min, mean, max) = (
            self.scaled(latency_ms, self.settings.min),
            self.scaled(latency_ms, self.settings.mean),
            self.scaled(latency_ms, self.settings.max),
        );
        for template in &mut recording.responses {
            template.set_delay_strategy(self.settings.strategy);
            template.set_delay_min(min);
            template.set_delay_mean(mean);
            template.set_delay_max(max);
        }
        debug!(
            "Recording delay set to {}[{}, {}, {}]",
            self.settings.strategy, min, mean, max
        );
        Ok(())
    }
}
