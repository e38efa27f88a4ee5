//! The safety system: per-tick input evaluation, event application, active
//! level execution and output write-back.
//!
//! Runs as the executor's main task. Event producers (sequencer steps,
//! operator commands) hand events to a bounded lock-free ring consumed by
//! the tick thread; the active level is an atomic index read lock-free by
//! anyone. At most one event is applied per tick: a fault captured on the
//! previous tick first, then events fired by the current level's own input
//! actions, then externally queued ones. Input actions are re-evaluated
//! from the current HAL state every tick; a firing that loses the tick is
//! never carried over as a stale event.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use heapless::mpmc::MpMcQueue;
use parking_lot::Mutex;
use static_assertions::const_assert;
use thiserror::Error;
use tracing::{error, info, warn};

use takt_core::control::time_domain::GraphError;
use takt_core::control::{BlockError, TimeDomain};
use takt_core::task::executor::{MainTask, TickDirective};
use takt_core::task::shutdown;
use takt_core::time::Timestamp;

use crate::properties::{
    EventId, EventVisibility, InputAction, LevelAction, LevelId, OutputAction, SafetyEvent,
    SafetyProperties,
};

/// Capacity of the external event ring. Power of two, required by the
/// lock-free queue.
pub const EVENT_QUEUE_CAPACITY: usize = 16;
const_assert!(EVENT_QUEUE_CAPACITY.is_power_of_two());

/// A `trigger_event` call that could not be accepted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventRejected {
    /// Private events may only fire from input actions of the active level.
    #[error("event '{event}' is private and cannot be triggered externally")]
    RejectedPrivate { event: String },

    /// The active level defines no transition for this event.
    #[error("event '{event}' is not allowed in level '{level}'")]
    NotAllowedInLevel { event: String, level: String },

    /// The bounded event ring is full.
    #[error("event queue full, dropping '{event}'")]
    QueueFull { event: String },
}

/// State shared between the tick thread and event producers.
struct SharedState {
    /// Index of the active level. Swapped only by the tick thread.
    current: AtomicU32,
    /// Externally triggered events, consumed one per tick.
    queue: MpMcQueue<EventId, EVENT_QUEUE_CAPACITY>,
    /// Per-level transition tables.
    tables: Vec<HashMap<EventId, (LevelId, EventVisibility)>>,
    level_names: Vec<Arc<str>>,
    event_names: Vec<Arc<str>>,
}

impl SharedState {
    #[inline]
    fn current(&self) -> usize {
        self.current.load(Ordering::Acquire) as usize
    }

    fn trigger(&self, event: &SafetyEvent) -> Result<(), EventRejected> {
        let current = self.current();
        match self.tables[current].get(&event.id()) {
            None => Err(EventRejected::NotAllowedInLevel {
                event: event.name().to_string(),
                level: self.level_names[current].to_string(),
            }),
            Some((_, EventVisibility::Private)) => Err(EventRejected::RejectedPrivate {
                event: event.name().to_string(),
            }),
            Some((_, EventVisibility::Public)) => {
                self.queue
                    .enqueue(event.id())
                    .map_err(|_| EventRejected::QueueFull {
                        event: event.name().to_string(),
                    })
            }
        }
    }
}

/// Cloneable, thread-safe access to a running safety system.
#[derive(Clone)]
pub struct SafetySystemHandle {
    shared: Arc<SharedState>,
}

impl SafetySystemHandle {
    /// Enqueue `event` for the next tick.
    pub fn trigger_event(&self, event: &SafetyEvent) -> Result<(), EventRejected> {
        self.shared.trigger(event)
    }

    /// Snapshot of the active level. Lock-free.
    pub fn current_level(&self) -> LevelId {
        LevelId(self.shared.current.load(Ordering::Acquire))
    }

    /// Name of the active level. Lock-free.
    pub fn current_level_name(&self) -> Arc<str> {
        Arc::clone(&self.shared.level_names[self.shared.current()])
    }
}

struct LevelRuntime {
    name: Arc<str>,
    input_actions: Vec<InputAction>,
    output_actions: Vec<OutputAction>,
    domains: Vec<Arc<Mutex<TimeDomain>>>,
    on_entry: Option<LevelAction>,
    on_exit: Option<LevelAction>,
}

/// The level/event state machine, evaluated once per tick as the executor's
/// main task.
pub struct SafetySystem {
    period: f64,
    levels: Vec<LevelRuntime>,
    shared: Arc<SharedState>,
    /// Fault captured on a previous tick, applied before anything else.
    /// The only event state that survives a tick; input-action firings are
    /// re-derived from the HAL every tick.
    pending_fault: Option<EventId>,
    fault: EventId,
}

impl SafetySystem {
    /// Validate `properties` and build the system with tick period [s].
    pub fn new(
        properties: SafetyProperties,
        period: f64,
    ) -> Result<Self, crate::properties::ConfigurationError> {
        properties.validate()?;
        let entry = properties.entry.expect("validate checked the entry level");

        let mut tables = Vec::with_capacity(properties.levels.len());
        let mut level_names = Vec::with_capacity(properties.levels.len());
        let mut levels = Vec::with_capacity(properties.levels.len());
        for spec in properties.levels {
            tables.push(spec.transitions);
            level_names.push(Arc::clone(&spec.name));
            levels.push(LevelRuntime {
                name: spec.name,
                input_actions: spec.input_actions,
                output_actions: spec.output_actions,
                domains: spec.domains,
                on_entry: spec.on_entry,
                on_exit: spec.on_exit,
            });
        }

        let shared = Arc::new(SharedState {
            current: AtomicU32::new(entry.0),
            queue: MpMcQueue::new(),
            tables,
            level_names,
            event_names: properties.event_names,
        });

        info!(
            levels = levels.len(),
            entry = %shared.level_names[entry.index()],
            period_s = period,
            "safety system constructed"
        );
        Ok(Self {
            period,
            levels,
            shared,
            pending_fault: None,
            fault: properties.fault,
        })
    }

    /// Cloneable handle for event producers.
    pub fn handle(&self) -> SafetySystemHandle {
        SafetySystemHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Enqueue `event` for the next tick.
    pub fn trigger_event(&self, event: &SafetyEvent) -> Result<(), EventRejected> {
        self.shared.trigger(event)
    }

    /// Snapshot of the active level. Lock-free.
    pub fn current_level(&self) -> LevelId {
        LevelId(self.shared.current.load(Ordering::Acquire))
    }

    /// Name of the active level.
    pub fn current_level_name(&self) -> Arc<str> {
        Arc::clone(&self.shared.level_names[self.shared.current()])
    }

    /// Arm the process-wide executor stop. Static and idempotent; safe to
    /// call from signal handling paths.
    pub fn exit_handler() {
        shutdown::request_stop();
    }

    fn event_name(&self, event: EventId) -> &str {
        &self.shared.event_names[event.index()]
    }

    /// Apply one pending event. `internal` marks events raised by the active
    /// level itself (input actions, fault capture), which may use private
    /// transitions.
    fn apply_event(&mut self, event: EventId, internal: bool) {
        let current = self.shared.current();
        let Some(&(target, visibility)) = self.shared.tables[current].get(&event) else {
            warn!(
                event = self.event_name(event),
                level = %self.levels[current].name,
                "event no longer defined in the active level; dropped"
            );
            return;
        };
        if !internal && visibility == EventVisibility::Private {
            warn!(
                event = self.event_name(event),
                level = %self.levels[current].name,
                "private event from external source; dropped"
            );
            return;
        }

        if let Some(on_exit) = self.levels[current].on_exit.as_mut() {
            on_exit();
        }
        self.shared.current.store(target.0, Ordering::Release);
        info!(
            from = %self.levels[current].name,
            to = %self.levels[target.index()].name,
            event = self.event_name(event),
            "safety level transition"
        );
        if let Some(on_entry) = self.levels[target.index()].on_entry.as_mut() {
            on_entry();
        }
    }

    /// Convert a captured block error into the fault event, or abort when
    /// the active level has no fault handler.
    fn capture_fault(&mut self, source: &str, error: &BlockError) -> TickDirective {
        error!(source, error = %error, "fault captured on tick thread");
        let current = self.shared.current();
        if self.shared.tables[current].contains_key(&self.fault) {
            self.pending_fault = Some(self.fault);
            TickDirective::Continue
        } else {
            TickDirective::Abort(format!(
                "fault in '{source}' with no fault handler in level '{}': {error}",
                self.levels[current].name
            ))
        }
    }
}

impl MainTask for SafetySystem {
    fn name(&self) -> &str {
        "safety"
    }

    fn period(&self) -> f64 {
        self.period
    }

    fn startup(&mut self) -> Result<(), GraphError> {
        for level in &self.levels {
            for domain in &level.domains {
                domain.lock().freeze()?;
            }
        }
        let entry = self.shared.current();
        info!(level = %self.levels[entry].name, "safety system starting");
        if let Some(on_entry) = self.levels[entry].on_entry.as_mut() {
            on_entry();
        }
        Ok(())
    }

    fn tick(&mut self, now: Timestamp) -> TickDirective {
        // 1. Input evaluation: the active level's input actions, against the
        //    HAL state of this tick. The first firing in declaration order
        //    is the candidate; losers are not kept, the next tick
        //    re-evaluates them.
        let current = self.shared.current();
        let fired = self.levels[current]
            .input_actions
            .iter()
            .find_map(|action| action.fires());

        // 2. Event application: at most one event per tick. A captured
        //    fault precedes input-action events, which precede externally
        //    queued ones.
        let pending = match self.pending_fault.take() {
            Some(fault) => Some((fault, true)),
            None => fired
                .map(|event| (event, true))
                .or_else(|| self.shared.queue.dequeue().map(|event| (event, false))),
        };
        if let Some((event, internal)) = pending {
            self.apply_event(event, internal);
        }

        // 3. Active-level execution: the (possibly new) current level's
        //    domains tick in declaration order.
        let current = self.shared.current();
        for idx in 0..self.levels[current].domains.len() {
            let domain = Arc::clone(&self.levels[current].domains[idx]);
            let result = domain.lock().tick(now);
            if let Err(e) = result {
                let source = domain.lock().name().to_string();
                return self.capture_fault(&source, &e);
            }
        }

        // 4. Output write-back through HAL.
        for action in &self.levels[current].output_actions {
            action.apply();
        }

        TickDirective::Continue
    }

    fn on_fault(&mut self, task: &str, error: &BlockError) -> TickDirective {
        self.capture_fault(task, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{ConfigurationError, EventVisibility, InputAction, OutputAction};
    use takt_core::control::Block;
    use takt_core::hal::Hal;

    fn test_hal() -> Hal {
        Hal::from_toml(
            r#"
[[logic_input]]
name = "emergency"

[[logic_input]]
name = "guard"

[[logic_output]]
name = "power"
"#,
        )
        .unwrap()
    }

    /// off --start--> running --halt--> off, entry = off.
    fn walk_system() -> (SafetySystem, SafetyEvent, SafetyEvent) {
        let mut props = SafetyProperties::new();
        let off = props.level("off");
        let running = props.level("running");
        let start = props.event("start");
        let halt = props.event("halt");
        props.transition(off, &start, running, EventVisibility::Public);
        props.transition(running, &halt, off, EventVisibility::Public);
        props.set_entry_level(off);
        let system = SafetySystem::new(props, 0.001).unwrap();
        (system, start, halt)
    }

    #[test]
    fn construction_validates() {
        let mut props = SafetyProperties::new();
        props.level("lonely");
        assert_eq!(
            SafetySystem::new(props, 0.001).err(),
            Some(ConfigurationError::NoEntryLevel)
        );
    }

    #[test]
    fn triggered_event_applies_on_next_tick() {
        let (mut system, start, _) = walk_system();
        assert_eq!(&*system.current_level_name(), "off");

        system.trigger_event(&start).unwrap();
        // Not observed until the next tick.
        assert_eq!(&*system.current_level_name(), "off");

        system.tick(Timestamp::from_nanos(1));
        assert_eq!(&*system.current_level_name(), "running");
    }

    #[test]
    fn at_most_one_event_per_tick() {
        let (mut system, start, halt) = walk_system();
        system.trigger_event(&start).unwrap();
        // `halt` is not allowed in `off`; enqueue it via the handle after
        // the transition instead.
        system.tick(Timestamp::from_nanos(1));
        assert_eq!(&*system.current_level_name(), "running");

        system.trigger_event(&halt).unwrap();
        system.tick(Timestamp::from_nanos(2));
        assert_eq!(&*system.current_level_name(), "off");
    }

    #[test]
    fn undefined_event_rejected_at_trigger() {
        let (system, _, halt) = walk_system();
        assert_eq!(
            system.trigger_event(&halt),
            Err(EventRejected::NotAllowedInLevel {
                event: "halt".to_string(),
                level: "off".to_string(),
            })
        );
    }

    #[test]
    fn private_event_rejected_externally() {
        let hal = test_hal();
        let mut props = SafetyProperties::new();
        let off = props.level("off");
        let running = props.level("running");
        let start = props.event("start");
        props.transition(off, &start, running, EventVisibility::Private);
        props.transition(running, &start, off, EventVisibility::Public);
        let emergency = hal.logic_input("emergency", false).unwrap();
        props.critical_input(emergency.clone());
        props.input_action(off, InputAction::check(emergency, true, &start));
        props.set_entry_level(off);
        let mut system = SafetySystem::new(props, 0.001).unwrap();

        assert_eq!(
            system.trigger_event(&start),
            Err(EventRejected::RejectedPrivate {
                event: "start".to_string(),
            })
        );

        // The same private event fired from the level's input action works.
        hal.feed_logic("emergency", true).unwrap();
        system.tick(Timestamp::from_nanos(1));
        assert_eq!(&*system.current_level_name(), "running");
    }

    #[test]
    fn input_actions_precede_external_events() {
        let hal = test_hal();
        let mut props = SafetyProperties::new();
        let idle = props.level("idle");
        let stopped = props.level("stopped");
        let moving = props.level("moving");
        let se_stop = props.event("stop");
        let se_move = props.event("move");
        props.transition(idle, &se_stop, stopped, EventVisibility::Public);
        props.transition(idle, &se_move, moving, EventVisibility::Public);
        props.transition(stopped, &se_move, moving, EventVisibility::Public);
        props.transition(moving, &se_stop, stopped, EventVisibility::Public);
        let emergency = hal.logic_input("emergency", false).unwrap();
        props.critical_input(emergency.clone());
        props.input_action(idle, InputAction::check(emergency, true, &se_stop));
        props.set_entry_level(idle);
        let mut system = SafetySystem::new(props, 0.001).unwrap();

        // Both an external `move` and the emergency input are pending; the
        // input action wins the tick.
        system.trigger_event(&se_move).unwrap();
        hal.feed_logic("emergency", true).unwrap();
        system.tick(Timestamp::from_nanos(1));
        assert_eq!(&*system.current_level_name(), "stopped");

        // The queued `move` is applied on the following tick.
        hal.feed_logic("emergency", false).unwrap();
        system.tick(Timestamp::from_nanos(2));
        assert_eq!(&*system.current_level_name(), "moving");
    }

    #[test]
    fn simultaneous_firings_produce_one_transition_and_no_stale_event() {
        let hal = test_hal();
        let mut props = SafetyProperties::new();
        let operational = props.level("operational");
        let off = props.level("off");
        let trapped = props.level("trapped");
        let se_estop = props.event("estop");
        props.transition(operational, &se_estop, off, EventVisibility::Public);
        // A stale carried-over estop would move `off` here.
        props.transition(off, &se_estop, trapped, EventVisibility::Public);
        let emergency = hal.logic_input("emergency", false).unwrap();
        let guard = hal.logic_input("guard", false).unwrap();
        props.critical_input(emergency.clone());
        props.critical_input(guard.clone());
        props.input_action(operational, InputAction::check(emergency, true, &se_estop));
        props.input_action(operational, InputAction::check(guard, true, &se_estop));
        props.set_entry_level(operational);
        let mut system = SafetySystem::new(props, 0.001).unwrap();

        // Both actions trip in the same tick; exactly one transition runs.
        hal.feed_logic("emergency", true).unwrap();
        hal.feed_logic("guard", true).unwrap();
        system.tick(Timestamp::from_nanos(1));
        assert_eq!(&*system.current_level_name(), "off");

        // The losing firing was not carried over: `off` stays put.
        system.tick(Timestamp::from_nanos(2));
        system.tick(Timestamp::from_nanos(3));
        assert_eq!(&*system.current_level_name(), "off");
    }

    #[test]
    fn entry_and_exit_handlers_run_in_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut props = SafetyProperties::new();
        let off = props.level("off");
        let running = props.level("running");
        let start = props.event("start");
        props.transition(off, &start, running, EventVisibility::Public);
        props.transition(running, &start, off, EventVisibility::Public);
        props.set_entry_level(off);
        props.on_entry(off, {
            let trace = trace.clone();
            move || trace.lock().push("enter off")
        });
        props.on_exit(off, {
            let trace = trace.clone();
            move || trace.lock().push("exit off")
        });
        props.on_entry(running, {
            let trace = trace.clone();
            move || trace.lock().push("enter running")
        });
        let mut system = SafetySystem::new(props, 0.001).unwrap();

        system.startup().unwrap();
        system.trigger_event(&start).unwrap();
        system.tick(Timestamp::from_nanos(1));
        assert_eq!(
            *trace.lock(),
            vec!["enter off", "exit off", "enter running"]
        );
    }

    #[test]
    fn output_actions_flush_each_tick() {
        let hal = test_hal();
        let mut props = SafetyProperties::new();
        let off = props.level("off");
        let running = props.level("running");
        let start = props.event("start");
        props.transition(off, &start, running, EventVisibility::Public);
        props.transition(running, &start, off, EventVisibility::Public);
        props.output_action(
            off,
            OutputAction::set(hal.logic_output("power", false).unwrap(), false),
        );
        props.output_action(
            running,
            OutputAction::set(hal.logic_output("power", false).unwrap(), true),
        );
        props.set_entry_level(off);
        let mut system = SafetySystem::new(props, 0.001).unwrap();

        system.tick(Timestamp::from_nanos(1));
        assert!(!hal.probe_logic("power").unwrap());

        system.trigger_event(&start).unwrap();
        system.tick(Timestamp::from_nanos(2));
        assert!(hal.probe_logic("power").unwrap());
    }

    struct FailingBlock;

    impl Block for FailingBlock {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&mut self, _now: Timestamp) -> Result<(), BlockError> {
            Err(BlockError::runtime("failing", "sensor went away"))
        }
    }

    fn system_with_failing_domain(
        with_fault_handler: bool,
    ) -> (SafetySystem, Arc<Mutex<TimeDomain>>) {
        let mut props = SafetyProperties::new();
        let running = props.level("running");
        let safe = props.level("safe");
        let step = props.event("step");
        props.transition(safe, &step, running, EventVisibility::Public);
        if with_fault_handler {
            let fault = props.fault_event();
            props.transition(running, &fault, safe, EventVisibility::Private);
        } else {
            props.transition(running, &step, safe, EventVisibility::Public);
        }

        let domain = Arc::new(Mutex::new(TimeDomain::new("loop", 0.001)));
        domain.lock().add(Arc::new(Mutex::new(FailingBlock))).unwrap();
        props.add_domain(running, Arc::clone(&domain));
        props.set_entry_level(running);
        (SafetySystem::new(props, 0.001).unwrap(), domain)
    }

    #[test]
    fn block_fault_transitions_through_fault_handler() {
        let (mut system, _domain) = system_with_failing_domain(true);
        system.startup().unwrap();

        // The fault is captured as pending; the transition happens on the
        // next tick.
        assert_eq!(system.tick(Timestamp::from_nanos(1)), TickDirective::Continue);
        assert_eq!(&*system.current_level_name(), "running");
        assert_eq!(system.tick(Timestamp::from_nanos(2)), TickDirective::Continue);
        assert_eq!(&*system.current_level_name(), "safe");
    }

    #[test]
    fn block_fault_without_handler_aborts() {
        let (mut system, _domain) = system_with_failing_domain(false);
        system.startup().unwrap();
        assert!(matches!(
            system.tick(Timestamp::from_nanos(1)),
            TickDirective::Abort(_)
        ));
    }

    #[test]
    fn periodic_fault_routes_through_on_fault() {
        let (mut system, _) = system_with_failing_domain(true);
        let error = BlockError::runtime("logger", "disk full");
        assert_eq!(
            system.on_fault("logger", &error),
            TickDirective::Continue
        );
        // Fault pending: next tick transitions.
        system.tick(Timestamp::from_nanos(1));
        assert_eq!(&*system.current_level_name(), "safe");
    }

    #[test]
    fn exit_handler_arms_shutdown_flag() {
        shutdown::reset();
        SafetySystem::exit_handler();
        SafetySystem::exit_handler();
        assert!(shutdown::stop_requested());
        shutdown::reset();
    }

    #[test]
    fn queue_overflow_reports_rejection() {
        let (system, start, _) = walk_system();
        for _ in 0..EVENT_QUEUE_CAPACITY {
            // Capacity minus one slot may apply depending on ring layout;
            // stop at the first rejection.
            if system.trigger_event(&start).is_err() {
                return;
            }
        }
        assert_eq!(
            system.trigger_event(&start),
            Err(EventRejected::QueueFull {
                event: "start".to_string(),
            })
        );
    }
}
