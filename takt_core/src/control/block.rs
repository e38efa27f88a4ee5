//! Block contract: one computation per tick.
//!
//! A block reads only its inputs and writes only its outputs (HAL-bound
//! blocks additionally touch their HAL handles). Port enumeration hands the
//! freeze pass the Input→Output dependency edges and lets it seal ports
//! against late re-wiring.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::control::signal::{InputPort, OutputPort};
use crate::time::Timestamp;

/// Runtime error raised by a block.
///
/// Whatever escapes a [`Block::run`] is caught by the tick thread and
/// converted into a safety fault.
#[derive(Debug, Clone, Error)]
pub enum BlockError {
    /// Port access with a bad index.
    #[error("index {index} out of range in block '{block}' ({len} ports)")]
    IndexOutOfRange {
        block: String,
        index: usize,
        len: usize,
    },

    /// An input was sampled before being wired.
    #[error("input '{port}' of block '{block}' is not connected")]
    UnconnectedInput { block: String, port: String },

    /// Block-specific runtime failure.
    #[error("block '{block}' failed: {reason}")]
    Runtime { block: String, reason: String },
}

impl BlockError {
    /// Bad port index.
    pub fn index(block: &str, index: usize, len: usize) -> Self {
        Self::IndexOutOfRange {
            block: block.to_string(),
            index,
            len,
        }
    }

    /// Unwired input sampled at runtime.
    pub fn unconnected(block: &str, port: &str) -> Self {
        Self::UnconnectedInput {
            block: block.to_string(),
            port: port.to_string(),
        }
    }

    /// Block-specific failure.
    pub fn runtime(block: &str, reason: impl Into<String>) -> Self {
        Self::Runtime {
            block: block.to_string(),
            reason: reason.into(),
        }
    }
}

/// A processing node in the dataflow graph.
///
/// `run()` must not block; the tick thread calls it once per period in the
/// frozen topological order of its time domain. Source blocks stamp their
/// outputs with the tick time `now`; transforming blocks propagate their
/// input timestamps.
pub trait Block: Send {
    /// Block name, unique within its time domain by convention.
    fn name(&self) -> &str;

    /// Enumerate input ports, in declaration order.
    fn inputs(&mut self) -> Vec<&mut dyn InputPort> {
        Vec::new()
    }

    /// Enumerate output ports, in declaration order.
    fn outputs(&self) -> Vec<&dyn OutputPort> {
        Vec::new()
    }

    /// Perform one computation.
    fn run(&mut self, now: Timestamp) -> Result<(), BlockError>;
}

/// How a time domain holds its blocks.
///
/// The application keeps a typed `Arc<Mutex<B>>` for parameter access; the
/// domain drives `run()` through this erased alias. The coercion is implicit:
/// `domain.add(block.clone())`.
pub type SharedBlock = Arc<Mutex<dyn Block>>;
