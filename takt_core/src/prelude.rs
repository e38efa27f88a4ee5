//! Prelude module for common re-exports.
//!
//! ```rust
//! use takt_core::prelude::*;
//! ```

// ─── Control system ─────────────────────────────────────────────────
pub use crate::control::blocks::{Constant, DeMux, Gain, Sum, WrapAround};
pub use crate::control::{
    Block, BlockError, GraphError, Input, Output, SharedBlock, Signal, TimeDomain,
};

// ─── Tasks & executor ───────────────────────────────────────────────
pub use crate::task::{
    Executor, ExecutorError, ExecutorHandle, MainTask, Periodic, TickDirective,
};

// ─── HAL ────────────────────────────────────────────────────────────
pub use crate::hal::{AnalogInput, AnalogOutput, Hal, HalError, LogicInput, LogicOutput};

// ─── Time ───────────────────────────────────────────────────────────
pub use crate::time::Timestamp;
