//! Declarative description of the safety state machine.
//!
//! A properties object is built during setup and handed to
//! [`SafetySystem::new`](crate::system::SafetySystem::new), which validates
//! it: the entry level must reach every level, every declared critical input
//! must be watched by an input action, and no event may be left out of every
//! transition table. Level and event ids are only valid for the properties
//! object that created them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use takt_core::control::TimeDomain;
use takt_core::hal::{AnalogInput, AnalogOutput, LogicInput, LogicOutput};

/// Index of a declared safety event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub(crate) u32);

impl EventId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a declared safety level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelId(pub(crate) u32);

impl LevelId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A declared safety event. Cheap to clone; identity is the id.
#[derive(Debug, Clone)]
pub struct SafetyEvent {
    pub(crate) id: EventId,
    name: Arc<str>,
}

impl SafetyEvent {
    /// Event id within the owning properties object.
    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for SafetyEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SafetyEvent {}

/// Whether an event may be triggered from outside the safety system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventVisibility {
    /// Triggerable externally (sequencer steps, operator commands).
    Public,
    /// Only fireable from within a level's own input actions.
    Private,
}

/// Watches one critical input and stages an event on match.
pub enum InputAction {
    /// Stage `event` when the input reads `expected`.
    Logic {
        input: LogicInput,
        expected: bool,
        event: EventId,
    },
    /// Stage `event` when the input leaves `[min, max]`.
    AnalogRange {
        input: AnalogInput,
        min: f64,
        max: f64,
        event: EventId,
    },
}

impl InputAction {
    /// Stage `event` when `input` reads `expected`.
    pub fn check(input: LogicInput, expected: bool, event: &SafetyEvent) -> Self {
        Self::Logic {
            input,
            expected,
            event: event.id,
        }
    }

    /// Stage `event` when `input` leaves `[min, max]`.
    pub fn range(input: AnalogInput, min: f64, max: f64, event: &SafetyEvent) -> Self {
        Self::AnalogRange {
            input,
            min,
            max,
            event: event.id,
        }
    }

    /// Evaluate against the current HAL state.
    pub(crate) fn fires(&self) -> Option<EventId> {
        match self {
            Self::Logic {
                input,
                expected,
                event,
            } => (input.read() == *expected).then_some(*event),
            Self::AnalogRange {
                input,
                min,
                max,
                event,
            } => {
                let value = input.read();
                (value < *min || value > *max).then_some(*event)
            }
        }
    }

    pub(crate) fn input_name(&self) -> &str {
        match self {
            Self::Logic { input, .. } => input.name(),
            Self::AnalogRange { input, .. } => input.name(),
        }
    }
}

/// Forces one critical output while a level is active.
pub enum OutputAction {
    Logic { output: LogicOutput, value: bool },
    Analog { output: AnalogOutput, value: f64 },
}

impl OutputAction {
    /// Hold a digital output at `value`.
    pub fn set(output: LogicOutput, value: bool) -> Self {
        Self::Logic { output, value }
    }

    /// Hold an analog output at `value`.
    pub fn set_analog(output: AnalogOutput, value: f64) -> Self {
        Self::Analog { output, value }
    }

    /// Flush through HAL.
    pub(crate) fn apply(&self) {
        match self {
            Self::Logic { output, value } => output.write(*value),
            Self::Analog { output, value } => output.write(*value),
        }
    }
}

/// Handler run on level entry or exit.
pub type LevelAction = Box<dyn FnMut() + Send>;

pub(crate) struct LevelSpec {
    pub(crate) name: Arc<str>,
    pub(crate) input_actions: Vec<InputAction>,
    pub(crate) output_actions: Vec<OutputAction>,
    pub(crate) transitions: HashMap<EventId, (LevelId, EventVisibility)>,
    pub(crate) domains: Vec<Arc<Mutex<TimeDomain>>>,
    pub(crate) on_entry: Option<LevelAction>,
    pub(crate) on_exit: Option<LevelAction>,
}

impl LevelSpec {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            input_actions: Vec::new(),
            output_actions: Vec::new(),
            transitions: HashMap::new(),
            domains: Vec::new(),
            on_entry: None,
            on_exit: None,
        }
    }
}

/// Validation failure in a properties object. Fatal at construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No entry level was set (or no levels exist).
    #[error("no entry level set")]
    NoEntryLevel,

    /// Two levels share a name.
    #[error("duplicate level name '{0}'")]
    DuplicateLevel(String),

    /// Two events share a name.
    #[error("duplicate event name '{0}'")]
    DuplicateEvent(String),

    /// A level cannot be reached from the entry level.
    #[error("level '{0}' is unreachable from the entry level")]
    UnreachableLevel(String),

    /// An event appears in no transition table.
    #[error("event '{0}' appears in no transition")]
    DanglingEvent(String),

    /// An input action watches an input not declared critical.
    #[error("input action references undeclared critical input '{0}'")]
    UnregisteredInput(String),

    /// A declared critical input is watched by no input action.
    #[error("critical input '{0}' is referenced by no input action")]
    UnreferencedCriticalInput(String),
}

/// The immutable description of the state machine.
///
/// Every properties object carries a built-in `fault` event, the channel the
/// tick thread reports block failures through.
pub struct SafetyProperties {
    pub(crate) levels: Vec<LevelSpec>,
    pub(crate) event_names: Vec<Arc<str>>,
    pub(crate) entry: Option<LevelId>,
    pub(crate) critical_logic_inputs: Vec<LogicInput>,
    pub(crate) critical_analog_inputs: Vec<AnalogInput>,
    pub(crate) fault: EventId,
}

impl SafetyProperties {
    pub fn new() -> Self {
        Self {
            levels: Vec::new(),
            event_names: vec![Arc::from("fault")],
            entry: None,
            critical_logic_inputs: Vec::new(),
            critical_analog_inputs: Vec::new(),
            fault: EventId(0),
        }
    }

    /// Declare a new event.
    pub fn event(&mut self, name: impl Into<String>) -> SafetyEvent {
        let name: Arc<str> = Arc::from(name.into().as_str());
        let id = EventId(self.event_names.len() as u32);
        self.event_names.push(Arc::clone(&name));
        SafetyEvent { id, name }
    }

    /// The built-in fault event.
    pub fn fault_event(&self) -> SafetyEvent {
        SafetyEvent {
            id: self.fault,
            name: Arc::clone(&self.event_names[self.fault.index()]),
        }
    }

    /// Declare a new level.
    pub fn level(&mut self, name: impl Into<String>) -> LevelId {
        let id = LevelId(self.levels.len() as u32);
        self.levels.push(LevelSpec::new(Arc::from(name.into().as_str())));
        id
    }

    /// Allow `event` to move `from` to `to`.
    pub fn transition(
        &mut self,
        from: LevelId,
        event: &SafetyEvent,
        to: LevelId,
        visibility: EventVisibility,
    ) {
        self.levels[from.index()]
            .transitions
            .insert(event.id, (to, visibility));
    }

    /// Watch a critical input while `level` is active.
    pub fn input_action(&mut self, level: LevelId, action: InputAction) {
        self.levels[level.index()].input_actions.push(action);
    }

    /// Force a critical output while `level` is active.
    pub fn output_action(&mut self, level: LevelId, action: OutputAction) {
        self.levels[level.index()].output_actions.push(action);
    }

    /// Tick `domain` while `level` is active. Declaration order is execution
    /// order.
    pub fn add_domain(&mut self, level: LevelId, domain: Arc<Mutex<TimeDomain>>) {
        self.levels[level.index()].domains.push(domain);
    }

    /// Handler run when `level` becomes active.
    pub fn on_entry(&mut self, level: LevelId, action: impl FnMut() + Send + 'static) {
        self.levels[level.index()].on_entry = Some(Box::new(action));
    }

    /// Handler run when `level` is left.
    pub fn on_exit(&mut self, level: LevelId, action: impl FnMut() + Send + 'static) {
        self.levels[level.index()].on_exit = Some(Box::new(action));
    }

    /// Declare a digital input as critical.
    pub fn critical_input(&mut self, input: LogicInput) {
        self.critical_logic_inputs.push(input);
    }

    /// Declare an analog input as critical.
    pub fn critical_analog_input(&mut self, input: AnalogInput) {
        self.critical_analog_inputs.push(input);
    }

    /// The level active at startup.
    pub fn set_entry_level(&mut self, level: LevelId) {
        self.entry = Some(level);
    }

    /// Run all validation rules. The first violation is returned.
    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        let entry = self.entry.ok_or(ConfigurationError::NoEntryLevel)?;

        let mut level_names = HashSet::new();
        for level in &self.levels {
            if !level_names.insert(level.name.clone()) {
                return Err(ConfigurationError::DuplicateLevel(level.name.to_string()));
            }
        }

        let mut event_names = HashSet::new();
        for name in &self.event_names {
            if !event_names.insert(name.clone()) {
                return Err(ConfigurationError::DuplicateEvent(name.to_string()));
            }
        }

        // Every level reachable from the entry level.
        let mut reached = vec![false; self.levels.len()];
        let mut pending = VecDeque::from([entry]);
        reached[entry.index()] = true;
        while let Some(level) = pending.pop_front() {
            for &(target, _) in self.levels[level.index()].transitions.values() {
                if !reached[target.index()] {
                    reached[target.index()] = true;
                    pending.push_back(target);
                }
            }
        }
        if let Some(idx) = reached.iter().position(|&r| !r) {
            return Err(ConfigurationError::UnreachableLevel(
                self.levels[idx].name.to_string(),
            ));
        }

        // No dangling event: every declared event sits in some transition
        // table. The built-in fault event is exempt; levels without a fault
        // handler abort instead.
        let mut used = vec![false; self.event_names.len()];
        used[self.fault.index()] = true;
        for level in &self.levels {
            for event in level.transitions.keys() {
                used[event.index()] = true;
            }
        }
        if let Some(idx) = used.iter().position(|&u| !u) {
            return Err(ConfigurationError::DanglingEvent(
                self.event_names[idx].to_string(),
            ));
        }

        // Critical inputs and input actions reference each other completely.
        let declared: HashSet<&str> = self
            .critical_logic_inputs
            .iter()
            .map(|input| input.name())
            .chain(self.critical_analog_inputs.iter().map(|input| input.name()))
            .collect();
        let mut referenced: HashSet<&str> = HashSet::new();
        for level in &self.levels {
            for action in &level.input_actions {
                let name = action.input_name();
                if !declared.contains(name) {
                    return Err(ConfigurationError::UnregisteredInput(name.to_string()));
                }
                referenced.insert(name);
            }
        }
        if let Some(&name) = declared.difference(&referenced).next() {
            return Err(ConfigurationError::UnreferencedCriticalInput(
                name.to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SafetyProperties {
    fn default() -> Self {
        Self::new()
    }
}
