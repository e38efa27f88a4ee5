//! # Takt Core
//!
//! Core of the takt realtime control framework. A control application is a
//! directed dataflow graph of signal-processing blocks grouped into time
//! domains, driven by a deterministic executor whose main task gates every
//! tick. Hardware is reached exclusively through the name-addressed HAL
//! facade.
//!
//! # Module Structure
//!
//! - [`control`] - Signals, ports, blocks, time domains and the block library
//! - [`task`] - Periodic tasks, the executor and the shutdown channel
//! - [`hal`] - Name-addressed digital/analog I/O facade
//! - [`time`] - Monotonic timestamps
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use takt_core::prelude::*;
//! ```

pub mod control;
pub mod hal;
pub mod prelude;
pub mod task;
pub mod time;
