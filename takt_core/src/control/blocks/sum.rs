//! N-input sum with per-input negation.

use std::ops::{AddAssign, SubAssign};

use crate::control::block::{Block, BlockError};
use crate::control::signal::{Input, InputPort, Output, OutputPort};
use crate::time::Timestamp;

/// `out = Σ ±inᵢ`. The output timestamp is taken from input 0.
///
/// Works with primitive numeric carriers; matrix carriers need a dedicated
/// accumulating block.
pub struct Sum<const N: usize, T>
where
    T: Copy + Default + Send + AddAssign + SubAssign,
{
    name: String,
    inputs: [Input<T>; N],
    negated: [bool; N],
    out: Output<T>,
}

impl<const N: usize, T> Sum<N, T>
where
    T: Copy + Default + Send + AddAssign + SubAssign,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: std::array::from_fn(|_| Input::new()),
            negated: [false; N],
            out: Output::new(),
        }
    }

    /// Input port `index`.
    pub fn input(&mut self, index: usize) -> Result<&mut Input<T>, BlockError> {
        if index >= N {
            return Err(BlockError::index(&self.name, index, N));
        }
        Ok(&mut self.inputs[index])
    }

    /// Subtract input `index` instead of adding it.
    pub fn negate_input(&mut self, index: usize) -> Result<(), BlockError> {
        if index >= N {
            return Err(BlockError::index(&self.name, index, N));
        }
        self.negated[index] = true;
        Ok(())
    }

    pub fn out(&self) -> &Output<T> {
        &self.out
    }
}

impl<const N: usize, T> Block for Sum<N, T>
where
    T: Copy + Default + Send + Sync + AddAssign + SubAssign,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&mut self) -> Vec<&mut dyn InputPort> {
        self.inputs
            .iter_mut()
            .map(|input| input as &mut dyn InputPort)
            .collect()
    }

    fn outputs(&self) -> Vec<&dyn OutputPort> {
        vec![&self.out]
    }

    fn run(&mut self, _now: Timestamp) -> Result<(), BlockError> {
        let mut acc = T::default();
        let mut first_timestamp = Timestamp::ZERO;
        for (idx, input) in self.inputs.iter().enumerate() {
            let sig = input
                .signal()
                .ok_or_else(|| BlockError::unconnected(&self.name, &format!("in{idx}")))?;
            if idx == 0 {
                first_timestamp = sig.timestamp;
            }
            if self.negated[idx] {
                acc -= sig.value;
            } else {
                acc += sig.value;
            }
        }
        self.out.set(acc, first_timestamp);
        Ok(())
    }
}
