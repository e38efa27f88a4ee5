//! Splits a vector signal into scalar outputs.

use crate::control::block::{Block, BlockError};
use crate::control::signal::{Input, InputPort, Output, OutputPort};
use crate::time::Timestamp;

/// One `[f64; N]` input, N scalar outputs.
///
/// Every output carries the input signal's timestamp.
pub struct DeMux<const N: usize> {
    name: String,
    input: Input<[f64; N]>,
    outs: [Output<f64>; N],
}

impl<const N: usize> DeMux<N> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: Input::new(),
            outs: std::array::from_fn(|_| Output::new()),
        }
    }

    pub fn input(&mut self) -> &mut Input<[f64; N]> {
        &mut self.input
    }

    /// Output port `index`.
    pub fn out(&self, index: usize) -> Result<&Output<f64>, BlockError> {
        if index >= N {
            return Err(BlockError::index(&self.name, index, N));
        }
        Ok(&self.outs[index])
    }
}

impl<const N: usize> Block for DeMux<N> {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&mut self) -> Vec<&mut dyn InputPort> {
        vec![&mut self.input]
    }

    fn outputs(&self) -> Vec<&dyn OutputPort> {
        self.outs.iter().map(|out| out as &dyn OutputPort).collect()
    }

    fn run(&mut self, _now: Timestamp) -> Result<(), BlockError> {
        let sig = self
            .input
            .signal()
            .ok_or_else(|| BlockError::unconnected(&self.name, "in"))?;
        for (idx, out) in self.outs.iter().enumerate() {
            out.set(sig.value[idx], sig.timestamp);
        }
        Ok(())
    }
}
