//! Multiplies its input by a constant factor.

use std::ops::Mul;

use crate::control::block::{Block, BlockError};
use crate::control::signal::{Input, InputPort, Output, OutputPort};
use crate::time::Timestamp;

/// `out = gain · in`. Propagates the input timestamp.
pub struct Gain<T>
where
    T: Copy + Default + Send + Mul<Output = T>,
{
    name: String,
    gain: T,
    input: Input<T>,
    out: Output<T>,
}

impl<T> Gain<T>
where
    T: Copy + Default + Send + Mul<Output = T>,
{
    pub fn new(name: impl Into<String>, gain: T) -> Self {
        Self {
            name: name.into(),
            gain,
            input: Input::new(),
            out: Output::new(),
        }
    }

    pub fn set_gain(&mut self, gain: T) {
        self.gain = gain;
    }

    pub fn input(&mut self) -> &mut Input<T> {
        &mut self.input
    }

    pub fn out(&self) -> &Output<T> {
        &self.out
    }
}

impl<T> Block for Gain<T>
where
    T: Copy + Default + Send + Sync + Mul<Output = T>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&mut self) -> Vec<&mut dyn InputPort> {
        vec![&mut self.input]
    }

    fn outputs(&self) -> Vec<&dyn OutputPort> {
        vec![&self.out]
    }

    fn run(&mut self, _now: Timestamp) -> Result<(), BlockError> {
        let sig = self
            .input
            .signal()
            .ok_or_else(|| BlockError::unconnected(&self.name, "in"))?;
        self.out.set(self.gain * sig.value, sig.timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::blocks::Constant;

    #[test]
    fn scales_and_propagates_timestamp() {
        let mut c = Constant::new("c", 3.0);
        let mut g = Gain::new("g", -2.0);
        g.input().connect(c.out()).unwrap();

        c.run(Timestamp::from_nanos(11)).unwrap();
        g.run(Timestamp::from_nanos(999)).unwrap();

        let sig = g.out().signal();
        assert_eq!(sig.value, -6.0);
        // Timestamp comes from the input, not the tick.
        assert_eq!(sig.timestamp, Timestamp::from_nanos(11));
    }

    #[test]
    fn unconnected_input_is_an_error() {
        let mut g: Gain<f64> = Gain::new("g", 1.0);
        assert!(matches!(
            g.run(Timestamp::ZERO),
            Err(BlockError::UnconnectedInput { .. })
        ));
    }
}
