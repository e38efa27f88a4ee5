//! Name-addressed I/O facade.
//!
//! The framework reaches hardware exclusively through named handles obtained
//! here. The name set is frozen once the configuration is read; lookups after
//! that either succeed or are a configuration error. All reads and writes are
//! single atomic operations: non-blocking and constant-time, safe to call
//! from the tick thread.
//!
//! The storage behind each point is a process-local simulation bank. Real
//! hardware backends publish into the same bank from their own threads (a
//! CAN pump, a fieldbus cycle) via the feeder handles; the tick thread never
//! blocks on them.

pub mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use clap::Parser;
use thiserror::Error;
use tracing::info;

pub use config::{AnalogPointConfig, HalArgs, HalConfig, LogicPointConfig};

/// Errors from HAL construction or lookup.
#[derive(Debug, Error)]
pub enum HalError {
    /// Two points of the same kind share a name.
    #[error("duplicate HAL point name '{0}'")]
    DuplicateName(String),

    /// Lookup of an undeclared point.
    #[error("no HAL entry named '{0}'")]
    MissingEntry(String),

    /// Malformed configuration file.
    #[error("HAL config error: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("HAL config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct AnalogPoint {
    state: Arc<AtomicU64>,
    scale: f64,
    offset: f64,
}

impl AnalogPoint {
    fn new(initial: f64, scale: f64, offset: f64) -> Self {
        Self {
            state: Arc::new(AtomicU64::new(initial.to_bits())),
            scale,
            offset,
        }
    }

    #[inline]
    fn raw(&self) -> f64 {
        f64::from_bits(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_raw(&self, value: f64) {
        self.state.store(value.to_bits(), Ordering::Release);
    }
}

/// Reader over a named digital input.
#[derive(Debug, Clone)]
pub struct LogicInput {
    name: Arc<str>,
    inverted: bool,
    state: Arc<AtomicBool>,
}

impl LogicInput {
    /// Current logical value, inversion applied.
    #[inline]
    pub fn read(&self) -> bool {
        self.state.load(Ordering::Acquire) != self.inverted
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Writer over a named digital output.
#[derive(Debug, Clone)]
pub struct LogicOutput {
    name: Arc<str>,
    inverted: bool,
    state: Arc<AtomicBool>,
}

impl LogicOutput {
    /// Commit a logical value, inversion applied.
    #[inline]
    pub fn write(&self, value: bool) {
        self.state.store(value != self.inverted, Ordering::Release);
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Reader over a named analog input, in engineering units.
#[derive(Debug, Clone)]
pub struct AnalogInput {
    name: Arc<str>,
    point: AnalogPoint,
}

impl AnalogInput {
    /// Current value: `raw · scale + offset`.
    #[inline]
    pub fn read(&self) -> f64 {
        self.point.raw() * self.point.scale + self.point.offset
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Writer over a named analog output, in engineering units.
#[derive(Debug, Clone)]
pub struct AnalogOutput {
    name: Arc<str>,
    point: AnalogPoint,
}

impl AnalogOutput {
    /// Commit a value; the stored raw value is `(v - offset) / scale`.
    #[inline]
    pub fn write(&self, value: f64) {
        let raw = if self.point.scale == 0.0 {
            0.0
        } else {
            (value - self.point.offset) / self.point.scale
        };
        self.point.set_raw(raw);
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The frozen set of named I/O points.
#[derive(Debug, Default)]
pub struct Hal {
    logic_inputs: HashMap<Arc<str>, Arc<AtomicBool>>,
    logic_outputs: HashMap<Arc<str>, Arc<AtomicBool>>,
    analog_inputs: HashMap<Arc<str>, AnalogPoint>,
    analog_outputs: HashMap<Arc<str>, AnalogPoint>,
}

impl Hal {
    /// Build from a parsed configuration. Duplicate names are fatal.
    pub fn from_config(config: &HalConfig) -> Result<Self, HalError> {
        fn build_logic(
            points: &[LogicPointConfig],
        ) -> Result<HashMap<Arc<str>, Arc<AtomicBool>>, HalError> {
            let mut map = HashMap::new();
            for point in points {
                let name: Arc<str> = point.name.as_str().into();
                if map
                    .insert(name, Arc::new(AtomicBool::new(point.initial)))
                    .is_some()
                {
                    return Err(HalError::DuplicateName(point.name.clone()));
                }
            }
            Ok(map)
        }

        fn build_analog(
            points: &[AnalogPointConfig],
        ) -> Result<HashMap<Arc<str>, AnalogPoint>, HalError> {
            let mut map = HashMap::new();
            for point in points {
                let name: Arc<str> = point.name.as_str().into();
                let analog = AnalogPoint::new(point.initial, point.scale, point.offset);
                if map.insert(name, analog).is_some() {
                    return Err(HalError::DuplicateName(point.name.clone()));
                }
            }
            Ok(map)
        }

        let hal = Self {
            logic_inputs: build_logic(&config.logic_input)?,
            logic_outputs: build_logic(&config.logic_output)?,
            analog_inputs: build_analog(&config.analog_input)?,
            analog_outputs: build_analog(&config.analog_output)?,
        };
        info!(
            logic_in = hal.logic_inputs.len(),
            logic_out = hal.logic_outputs.len(),
            analog_in = hal.analog_inputs.len(),
            analog_out = hal.analog_outputs.len(),
            "HAL configured"
        );
        Ok(hal)
    }

    /// Build from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, HalError> {
        Self::from_config(&HalConfig::from_toml(content)?)
    }

    /// Build from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, HalError> {
        Self::from_config(&HalConfig::from_file(path)?)
    }

    /// Parse the process CLI and load the referenced config file.
    ///
    /// Without a `--hal-config` flag an empty HAL is returned.
    pub fn read_config_from_args() -> Result<Self, HalError> {
        let args = HalArgs::parse();
        match args.hal_config {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn lookup<'a, V>(
        map: &'a HashMap<Arc<str>, V>,
        name: &str,
    ) -> Result<(&'a Arc<str>, &'a V), HalError> {
        map.get_key_value(name)
            .ok_or_else(|| HalError::MissingEntry(name.to_string()))
    }

    /// Reader over the named digital input.
    pub fn logic_input(&self, name: &str, inverted: bool) -> Result<LogicInput, HalError> {
        let (key, state) = Self::lookup(&self.logic_inputs, name)?;
        Ok(LogicInput {
            name: Arc::clone(key),
            inverted,
            state: Arc::clone(state),
        })
    }

    /// Writer over the named digital output.
    pub fn logic_output(&self, name: &str, inverted: bool) -> Result<LogicOutput, HalError> {
        let (key, state) = Self::lookup(&self.logic_outputs, name)?;
        Ok(LogicOutput {
            name: Arc::clone(key),
            inverted,
            state: Arc::clone(state),
        })
    }

    /// Reader over the named analog input.
    pub fn analog_input(&self, name: &str) -> Result<AnalogInput, HalError> {
        let (key, point) = Self::lookup(&self.analog_inputs, name)?;
        Ok(AnalogInput {
            name: Arc::clone(key),
            point: point.clone(),
        })
    }

    /// Writer over the named analog output.
    pub fn analog_output(&self, name: &str) -> Result<AnalogOutput, HalError> {
        let (key, point) = Self::lookup(&self.analog_outputs, name)?;
        Ok(AnalogOutput {
            name: Arc::clone(key),
            point: point.clone(),
        })
    }

    // ─── Simulation / backend access ────────────────────────────────

    /// Force the raw state of a digital input (simulation, hardware pumps).
    pub fn feed_logic(&self, name: &str, value: bool) -> Result<(), HalError> {
        let (_, state) = Self::lookup(&self.logic_inputs, name)?;
        state.store(value, Ordering::Release);
        Ok(())
    }

    /// Force the raw value of an analog input (simulation, hardware pumps).
    pub fn feed_analog(&self, name: &str, value: f64) -> Result<(), HalError> {
        let (_, point) = Self::lookup(&self.analog_inputs, name)?;
        point.set_raw(value);
        Ok(())
    }

    /// Observe the raw state of a digital output.
    pub fn probe_logic(&self, name: &str) -> Result<bool, HalError> {
        let (_, state) = Self::lookup(&self.logic_outputs, name)?;
        Ok(state.load(Ordering::Acquire))
    }

    /// Observe the raw value of an analog output.
    pub fn probe_analog(&self, name: &str) -> Result<f64, HalError> {
        let (_, point) = Self::lookup(&self.analog_outputs, name)?;
        Ok(point.raw())
    }
}
