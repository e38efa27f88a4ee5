//! Source block emitting a settable constant value.

use crate::control::block::{Block, BlockError};
use crate::control::signal::{Output, OutputPort};
use crate::time::Timestamp;

/// Emits its current value every tick, stamped with the tick time.
///
/// The value can be changed between ticks through a shared handle; the new
/// value is published on the next run.
pub struct Constant<T: Copy + Default + Send> {
    name: String,
    value: T,
    out: Output<T>,
}

impl<T: Copy + Default + Send> Constant<T> {
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            name: name.into(),
            value: initial,
            out: Output::new(),
        }
    }

    /// Value emitted on the next tick.
    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    pub fn out(&self) -> &Output<T> {
        &self.out
    }
}

impl<T: Copy + Default + Send + Sync> Block for Constant<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<&dyn OutputPort> {
        vec![&self.out]
    }

    fn run(&mut self, now: Timestamp) -> Result<(), BlockError> {
        self.out.set(self.value, now);
        Ok(())
    }
}
