//! Bench configuration.
//!
//! Stored as JSON. Every field has a default, so a config file only needs
//! the values that differ from the standard bench setup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bristol::{WavelengthUnit, DEFAULT_ADDRESS, DEFAULT_MAX_TRIES, DEFAULT_TIMEOUT};
use crate::channel::Channel;
use crate::correction::{ReferenceConfig, DEFAULT_SETTLE};
use crate::reference::CsD2Line;
use crate::telemetry::{DEFAULT_PUBLISH_PORT, DEFAULT_TOPIC};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Reference and target are both on channel {0}")]
    SameChannel(Channel),
}

/// Settings for one reference + target measurement bench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WavemeterConfig {
    /// Wavemeter host, `host:port`, or base URL.
    pub address: String,
    pub reference_channel: Channel,
    pub target_channel: Channel,
    /// Frequency the reference laser is locked to, in Hz.
    pub reference_frequency_hz: f64,
    pub settle_ms: u64,
    pub max_tries: usize,
    pub wavelength_unit: WavelengthUnit,
    pub timeout_ms: u64,
    pub telemetry_topic: String,
    pub telemetry_port: u16,
    /// First of the two GPIO lines driving the switch (GPIO backend only).
    pub gpio_base_line: u32,
}

impl Default for WavemeterConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            reference_channel: Channel::Ch0,
            target_channel: Channel::Ch1,
            reference_frequency_hz: CsD2Line::default().frequency_hz(),
            settle_ms: DEFAULT_SETTLE.as_millis() as u64,
            max_tries: DEFAULT_MAX_TRIES,
            wavelength_unit: WavelengthUnit::default(),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            telemetry_topic: DEFAULT_TOPIC.to_string(),
            telemetry_port: DEFAULT_PUBLISH_PORT,
            gpio_base_line: 0,
        }
    }
}

impl WavemeterConfig {
    /// Load from a JSON file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reference_channel == self.target_channel {
            return Err(ConfigError::SameChannel(self.reference_channel));
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reference_config(&self) -> ReferenceConfig {
        ReferenceConfig::new(
            self.reference_channel,
            self.target_channel,
            self.reference_frequency_hz,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_bench() {
        let config = WavemeterConfig::default();
        assert_eq!(config.address, "192.168.0.109");
        assert_eq!(config.settle(), Duration::from_millis(250));
        assert_eq!(config.max_tries, 25);
        assert_eq!(config.telemetry_port, 5554);
        assert_eq!(config.reference_frequency_hz, 351_721.6089e9);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(
            &path,
            r#"{"target_channel": 3, "wavelength_unit": "nanometers", "settle_ms": 50}"#,
        )
        .unwrap();

        let config = WavemeterConfig::load(&path).unwrap();
        assert_eq!(config.target_channel, Channel::Ch3);
        assert_eq!(config.wavelength_unit, WavelengthUnit::Nanometers);
        assert_eq!(config.settle(), Duration::from_millis(50));
        assert_eq!(config.reference_channel, Channel::Ch0);
        assert_eq!(config.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        let config = WavemeterConfig {
            address: "http://wm.local".to_string(),
            reference_channel: Channel::Ch2,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(WavemeterConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_channel_and_same_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");

        std::fs::write(&path, r#"{"target_channel": 4}"#).unwrap();
        assert!(matches!(
            WavemeterConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));

        std::fs::write(&path, r#"{"target_channel": 0}"#).unwrap();
        assert!(matches!(
            WavemeterConfig::load(&path),
            Err(ConfigError::SameChannel(Channel::Ch0))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            WavemeterConfig::load("/nonexistent/bench.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
