//! Wraps an input value into a fixed interval.
//!
//! The output lands in `(min, max]`: a value exactly at either boundary maps
//! to `max`. Useful for angle normalization where -π and +π denote the same
//! orientation.

use crate::control::block::{Block, BlockError};
use crate::control::signal::{Input, InputPort, Output, OutputPort};
use crate::time::Timestamp;

/// Carrier types that can be wrapped elementwise.
pub trait Wrap: Copy + Default + Send {
    fn wrap(self, min: Self, max: Self) -> Self;
}

impl Wrap for f64 {
    fn wrap(self, min: Self, max: Self) -> Self {
        let range = max - min;
        if range <= 0.0 {
            return self;
        }
        max - (max - self).rem_euclid(range)
    }
}

impl<const N: usize> Wrap for [f64; N] {
    fn wrap(self, min: Self, max: Self) -> Self {
        std::array::from_fn(|i| self[i].wrap(min[i], max[i]))
    }
}

/// Maps the input into `(min, max]`. Disabled, it passes the input through.
pub struct WrapAround<T: Wrap = f64> {
    name: String,
    min: T,
    max: T,
    enabled: bool,
    input: Input<T>,
    out: Output<T>,
}

impl<T: Wrap> WrapAround<T> {
    pub fn new(name: impl Into<String>, min: T, max: T) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            enabled: true,
            input: Input::new(),
            out: Output::new(),
        }
    }

    pub fn set_min_max(&mut self, min: T, max: T) {
        self.min = min;
        self.max = max;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn input(&mut self) -> &mut Input<T> {
        &mut self.input
    }

    pub fn out(&self) -> &Output<T> {
        &self.out
    }
}

impl<T: Wrap + Sync> Block for WrapAround<T> {
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
        let value = if self.enabled {
            sig.value.wrap(self.min, self.max)
        } else {
            sig.value
        };
        self.out.set(value, sig.timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;
    use crate::control::blocks::Constant;

    fn wrap_once(value: f64) -> f64 {
        let mut source = Constant::new("c", value);
        let mut wrap = WrapAround::new("wrap", -PI, PI);
        wrap.input().connect(source.out()).unwrap();
        source.run(Timestamp::from_nanos(1)).unwrap();
        wrap.run(Timestamp::from_nanos(1)).unwrap();
        wrap.out().signal().value
    }

    #[test]
    fn wraps_angles_into_pi_interval() {
        let cases = [
            (0.0, 0.0),
            (PI, PI),
            (PI + 0.1, -PI + 0.1),
            (-PI - 0.1, PI - 0.1),
            (3.0 * PI, PI),
        ];
        for (input, expected) in cases {
            let got = wrap_once(input);
            assert!(
                (got - expected).abs() < 1e-12,
                "wrap({input}) = {got}, expected {expected}"
            );
        }
    }

    #[test]
    fn lower_boundary_maps_to_max() {
        assert!((wrap_once(-PI) - PI).abs() < 1e-12);
    }

    #[test]
    fn disabled_passes_through() {
        let mut source = Constant::new("c", 10.0);
        let mut wrap = WrapAround::new("wrap", -1.0, 1.0);
        wrap.disable();
        wrap.input().connect(source.out()).unwrap();
        source.run(Timestamp::from_nanos(2)).unwrap();
        wrap.run(Timestamp::from_nanos(2)).unwrap();
        assert_eq!(wrap.out().signal().value, 10.0);
    }

    #[test]
    fn propagates_input_timestamp() {
        let mut source = Constant::new("c", 0.5);
        let mut wrap = WrapAround::new("wrap", -1.0, 1.0);
        wrap.input().connect(source.out()).unwrap();
        source.run(Timestamp::from_nanos(77)).unwrap();
        wrap.run(Timestamp::from_nanos(99)).unwrap();
        assert_eq!(wrap.out().signal().timestamp, Timestamp::from_nanos(77));
    }

    #[test]
    fn vector_wrap() {
        let mut source = Constant::new("c", [PI + 0.1, 0.0]);
        let mut wrap = WrapAround::new("wrap", [-PI, -1.0], [PI, 1.0]);
        wrap.input().connect(source.out()).unwrap();
        source.run(Timestamp::from_nanos(3)).unwrap();
        wrap.run(Timestamp::from_nanos(3)).unwrap();
        let value = wrap.out().signal().value;
        assert!((value[0] - (-PI + 0.1)).abs() < 1e-12);
        assert!((value[1] - 0.0).abs() < 1e-12);
    }
}
