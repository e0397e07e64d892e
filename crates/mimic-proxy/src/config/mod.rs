//! Configuration types for the mimic proxy.

mod filter;
mod listen;
mod management;
mod recording;
mod upstream;

use crate::filter::builtin;
use crate::recording::Mode;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use filter::{FilterConfig, FilterGroupConfig, ResponseField};
pub use listen::{ListenConfig, MetricsConfig, TlsConfig};
pub use management::ManagementConfig;
pub use recording::RecordingsConfig;
pub use upstream::UpstreamConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    /// Mode at startup; can be changed while running
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub recordings: RecordingsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub management: ManagementConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(tls) = &self.listen.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                anyhow::bail!("'listen.tls' requires both 'cert_path' and 'key_path'");
            }
        }

        if self.listen.request_timeout_ms == 0 {
            anyhow::bail!("'listen.request_timeout_ms' must be greater than 0");
        }

        match (
            &self.upstream.client_cert_path,
            &self.upstream.client_key_path,
        ) {
            (Some(_), None) | (None, Some(_)) => anyhow::bail!(
                "'upstream.client_cert_path' and 'upstream.client_key_path' must be set together"
            ),
            _ => {}
        }

        if self.recordings.directory.trim().is_empty() {
            anyhow::bail!("'recordings.directory' must not be empty");
        }

        if self.metrics.enabled && self.metrics.port == self.listen.port {
            anyhow::bail!(
                "Metrics port {} collides with the listener port",
                self.metrics.port
            );
        }

        for filter in &self.filters {
            if !builtin::is_known(&filter.name) {
                anyhow::bail!(
                    "Unknown filter '{}'. Available filters: {}",
                    filter.name,
                    builtin::NAMES.join(", ")
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::PatternField;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.listen.protocol(), "http");
        assert_eq!(config.mode, Mode::Playback);
        assert_eq!(config.recordings.directory, "recordings");
        assert!(!config.recordings.allow_multiple_matching);
        assert!(!config.metrics.enabled);
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
listen:
  port: 9000
  request_timeout_ms: 5000
mode: PLAYBACK_OR_RECORD
recordings:
  directory: /var/lib/mimic
  allow_multiple_matching: true
upstream:
  force_https: true
  connect_timeout_ms: 2000
management:
  hosts: [mimic-admin.local]
filters:
  - name: delay_response
    default:
      config:
        strategy: FIXED
        mean: 100
    groups:
      slow:
        request:
          path: ["/slow.*"]
          method: ["GET", "HEAD"]
        config:
          strategy: RANDOM
          min: 500
          max: 900
metrics:
  enabled: true
  port: 9100
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.listen.port, 9000);
        assert_eq!(config.mode, Mode::PlaybackOrRecord);
        assert!(config.recordings.allow_multiple_matching);
        assert!(config.upstream.force_https);
        assert_eq!(config.management.hosts, vec!["mimic-admin.local"]);

        let filter = &config.filters[0];
        assert!(filter.enabled);
        assert!(!filter.default.has_patterns());
        let slow = &filter.groups["slow"];
        assert_eq!(slow.request[&PatternField::Method], vec!["GET", "HEAD"]);
        assert_eq!(slow.config["min"].as_u64(), Some(500));
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let err = Config::from_yaml("filters:\n  - name: no_such_filter\n").unwrap_err();
        assert!(err.to_string().contains("Unknown filter"));
    }

    #[test]
    fn test_client_cert_requires_key() {
        let err = Config::from_yaml("upstream:\n  client_cert_path: cert.pem\n").unwrap_err();
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn test_https_listener_protocol() {
        let yaml = "listen:\n  tls:\n    cert_path: c.pem\n    key_path: k.pem\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.listen.protocol(), "https");
    }

    #[test]
    fn test_bad_mode_rejected() {
        assert!(Config::from_yaml("mode: REPLAY").is_err());
    }
}
