//! Block-diagram control systems.
//!
//! A control system is a set of blocks exchanging typed, timestamped signals
//! through connected ports. Blocks are grouped into [`TimeDomain`]s which
//! execute them in topological order, once per period.

pub mod block;
pub mod blocks;
pub mod signal;
pub mod time_domain;

pub use block::{Block, BlockError, SharedBlock};
pub use signal::{Input, InputPort, Output, OutputPort, Signal, SignalId};
pub use time_domain::{GraphError, TimeDomain};
