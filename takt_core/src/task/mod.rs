//! Periodic tasks and the deterministic executor.

pub mod executor;
pub mod periodic;
pub mod shutdown;

pub use executor::{Executor, ExecutorError, ExecutorHandle, MainTask, TickDirective, TickStats};
pub use periodic::{Periodic, TaskBody, TaskStats};
