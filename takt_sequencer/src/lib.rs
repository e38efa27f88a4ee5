//! # Takt Sequencer
//!
//! Cooperative, step-structured procedures running alongside the control
//! loop. A [`Sequence`] is an ordered list of named steps; a [`Sequencer`]
//! drives one on its own thread. Steps interact with the safety system only
//! through event triggers, which the tick thread observes no earlier than
//! the next control tick.
//!
//! # Module Structure
//!
//! - [`sequence`] - Steps, step results and the execution trace
//! - [`sequencer`] - The cooperative driver thread

pub mod sequence;
pub mod sequencer;

pub use sequence::{Sequence, SequenceResult, StepContext, StepResult, TraceHandle};
pub use sequencer::Sequencer;
