//! HAL configuration: named I/O points loaded from a TOML file.
//!
//! ```toml
//! [[logic_input]]
//! name = "emergency"
//! initial = false
//!
//! [[analog_input]]
//! name = "battery_voltage"
//! initial = 24.0
//! scale = 1.0
//! offset = 0.0
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::hal::HalError;

/// Declaration of a digital I/O point.
#[derive(Debug, Clone, Deserialize)]
pub struct LogicPointConfig {
    /// Name the application looks the point up by.
    pub name: String,
    /// Simulated state at startup.
    #[serde(default)]
    pub initial: bool,
}

/// Declaration of an analog I/O point.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalogPointConfig {
    /// Name the application looks the point up by.
    pub name: String,
    /// Simulated raw value at startup.
    #[serde(default)]
    pub initial: f64,
    /// Engineering-unit scale applied on read.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Engineering-unit offset applied after scaling.
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// Complete HAL I/O declaration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HalConfig {
    #[serde(default)]
    pub logic_input: Vec<LogicPointConfig>,
    #[serde(default)]
    pub logic_output: Vec<LogicPointConfig>,
    #[serde(default)]
    pub analog_input: Vec<AnalogPointConfig>,
    #[serde(default)]
    pub analog_output: Vec<AnalogPointConfig>,
}

impl HalConfig {
    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, HalError> {
        toml::from_str(content).map_err(|e| HalError::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HalError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

/// CLI arguments selecting the HAL configuration.
#[derive(Parser, Debug)]
#[command(name = "takt")]
#[command(about = "takt realtime control application")]
pub struct HalArgs {
    /// Path to the HAL I/O configuration file.
    #[arg(short = 'c', long = "hal-config")]
    pub hal_config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let cfg = HalConfig::from_toml(
            r#"
[[logic_input]]
name = "emergency"
initial = true

[[logic_output]]
name = "power"

[[analog_input]]
name = "battery"
initial = 2.0
scale = 10.0
offset = 4.0

[[analog_output]]
name = "valve"
"#,
        )
        .unwrap();
        assert_eq!(cfg.logic_input.len(), 1);
        assert!(cfg.logic_input[0].initial);
        assert_eq!(cfg.logic_output[0].name, "power");
        assert_eq!(cfg.analog_input[0].scale, 10.0);
        assert_eq!(cfg.analog_input[0].offset, 4.0);
        assert_eq!(cfg.analog_output[0].scale, 1.0);
    }

    #[test]
    fn empty_config_is_valid() {
        let cfg = HalConfig::from_toml("").unwrap();
        assert!(cfg.logic_input.is_empty());
        assert!(cfg.analog_output.is_empty());
    }

    #[test]
    fn parse_error_reported() {
        assert!(matches!(
            HalConfig::from_toml("logic_input = 3"),
            Err(HalError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[[logic_input]]\nname = \"limit_switch\"\ninitial = true\n"
        )
        .unwrap();
        let cfg = HalConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.logic_input[0].name, "limit_switch");
    }
}
