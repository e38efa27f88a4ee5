//! # Takt Safety
//!
//! Hierarchical safety state machine for takt control applications. A
//! [`SafetyProperties`] object declares levels, events, critical I/O and the
//! transition table; a [`SafetySystem`] validates it and runs as the
//! executor's main task, gating every control tick.
//!
//! # Module Structure
//!
//! - [`properties`] - Declarative state machine description and validation
//! - [`system`] - The per-tick evaluation engine
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut props = SafetyProperties::new();
//! let sl_off = props.level("off");
//! let sl_run = props.level("running");
//! let se_start = props.event("start");
//! props.transition(sl_off, &se_start, sl_run, EventVisibility::Public);
//! props.set_entry_level(sl_off);
//!
//! let safety = SafetySystem::new(props, 0.001)?;
//! executor.set_main_task(safety);
//! ```

pub mod properties;
pub mod system;

pub use properties::{
    ConfigurationError, EventVisibility, InputAction, LevelId, OutputAction, SafetyEvent,
    SafetyProperties,
};
pub use system::{EventRejected, SafetySystem, SafetySystemHandle};
