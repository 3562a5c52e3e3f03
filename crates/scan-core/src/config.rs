//! Device channel-map configuration.
//!
//! The mapping from logical target ids (what the designers and the
//! controlling layer talk about) to physical DAQ channels is installation
//! specific and supplied as TOML:
//!
//! ```toml
//! name = "Dev1"
//! counter_channel = 0
//! default_sample_rate = 100000.0
//!
//! [[analog]]
//! target = "galvo_x"
//! channel = 0
//! range = "bipolar_10v"
//!
//! [[digital]]
//! target = "405"
//! line = 0
//! ```
//!
//! Channel lists are sorted by physical index before task creation so the
//! buffer order handed to the hardware is deterministic regardless of the
//! order targets appear in the file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::hardware::VoltageRange;

/// One analog output channel mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogChannelSpec {
    /// Logical target id (e.g. an axis name).
    pub target: String,
    /// Physical analog-output channel index.
    pub channel: u32,
    /// Configured output range.
    #[serde(default)]
    pub range: VoltageRange,
}

/// One digital output line mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalLineSpec {
    /// Logical target id (e.g. a laser line name).
    pub target: String,
    /// Physical digital line index.
    pub line: u32,
}

fn default_sample_rate() -> f64 {
    100_000.0
}

/// The device's channel map and defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name, for logs.
    pub name: String,
    /// Counter channel used for the master sample clock.
    pub counter_channel: u32,
    /// Sample rate for direct single-channel writes, hertz.
    #[serde(default = "default_sample_rate")]
    pub default_sample_rate: f64,
    /// Analog output mappings.
    #[serde(default)]
    pub analog: Vec<AnalogChannelSpec>,
    /// Digital line mappings.
    #[serde(default)]
    pub digital: Vec<DigitalLineSpec>,
}

impl DeviceConfig {
    /// Parse from TOML text and validate.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ScanError::invalid_config(format!("device config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Semantic validation: positive rate, unique targets and channels
    /// within each family.
    pub fn validate(&self) -> Result<()> {
        if self.default_sample_rate <= 0.0 {
            return Err(ScanError::invalid_config(format!(
                "default sample rate must be positive, got {}",
                self.default_sample_rate
            )));
        }
        check_unique(
            "analog",
            self.analog.iter().map(|s| (s.target.as_str(), s.channel)),
        )?;
        check_unique(
            "digital",
            self.digital.iter().map(|s| (s.target.as_str(), s.line)),
        )?;
        Ok(())
    }

    /// Analog mappings sorted by physical channel index.
    pub fn analog_sorted(&self) -> Vec<AnalogChannelSpec> {
        let mut specs = self.analog.clone();
        specs.sort_by_key(|s| s.channel);
        specs
    }

    /// Digital mappings sorted by physical line index.
    pub fn digital_sorted(&self) -> Vec<DigitalLineSpec> {
        let mut specs = self.digital.clone();
        specs.sort_by_key(|s| s.line);
        specs
    }

    /// Analog mapping for `target`, if present.
    pub fn analog_for_target(&self, target: &str) -> Option<&AnalogChannelSpec> {
        self.analog.iter().find(|s| s.target == target)
    }

    /// Digital mapping for `target`, if present.
    pub fn digital_for_target(&self, target: &str) -> Option<&DigitalLineSpec> {
        self.digital.iter().find(|s| s.target == target)
    }
}

fn check_unique<'a>(
    family: &str,
    entries: impl Iterator<Item = (&'a str, u32)>,
) -> Result<()> {
    let mut targets = std::collections::BTreeSet::new();
    let mut channels = std::collections::BTreeSet::new();
    for (target, channel) in entries {
        if !targets.insert(target.to_string()) {
            return Err(ScanError::invalid_config(format!(
                "duplicate {family} target '{target}'"
            )));
        }
        if !channels.insert(channel) {
            return Err(ScanError::invalid_config(format!(
                "duplicate {family} channel {channel}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
name = "Dev1"
counter_channel = 0

[[analog]]
target = "galvo_x"
channel = 1

[[analog]]
target = "galvo_y"
channel = 0
range = "bipolar_5v"

[[digital]]
target = "405"
line = 0

[[digital]]
target = "488"
line = 1
"#;

    #[test]
    fn parses_and_sorts_channels() {
        let config = DeviceConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.name, "Dev1");
        assert_eq!(config.default_sample_rate, 100_000.0);

        let analog = config.analog_sorted();
        assert_eq!(analog[0].target, "galvo_y");
        assert_eq!(analog[0].range, VoltageRange::Bipolar5V);
        assert_eq!(analog[1].target, "galvo_x");
        assert_eq!(analog[1].range, VoltageRange::Bipolar10V);

        assert!(config.digital_for_target("405").is_some());
        assert!(config.analog_for_target("stage_z").is_none());
    }

    #[test]
    fn duplicate_channel_is_rejected() {
        let text = r#"
name = "Dev1"
counter_channel = 0

[[digital]]
target = "405"
line = 0

[[digital]]
target = "488"
line = 0
"#;
        let err = DeviceConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate digital channel"));
    }

    #[test]
    fn duplicate_target_is_rejected() {
        let text = r#"
name = "Dev1"
counter_channel = 0

[[analog]]
target = "galvo_x"
channel = 0

[[analog]]
target = "galvo_x"
channel = 1
"#;
        let err = DeviceConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate analog target"));
    }
}
