//! Step-structured procedures.
//!
//! A sequence is an ordered list of named steps. Each step returns where to
//! go next: the following step, a named step, or termination. A step may run
//! a nested sequence inline; the nested step names land in the caller's
//! trace, in execution order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// What a step tells the driver.
pub enum StepResult {
    /// Continue with the following step.
    Next,
    /// Jump to the named step.
    Goto(&'static str),
    /// Terminate the sequence.
    Done,
}

/// How a sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceResult {
    /// Ran to completion (or an explicit stop).
    Completed,
    /// Ended by [`Sequencer::abort`](crate::sequencer::Sequencer::abort).
    Aborted,
    /// A step jumped to an unknown name.
    Failed(String),
}

/// Cooperative flags shared between a driver and its running sequence.
#[derive(Debug, Default)]
pub(crate) struct RunFlags {
    /// Exit at the next step boundary, reporting `Aborted`.
    pub(crate) abort: AtomicBool,
    /// Finish after the current step, reporting `Completed`.
    pub(crate) stop: AtomicBool,
}

/// Observable record of executed step names.
#[derive(Debug, Clone, Default)]
pub struct TraceHandle(Arc<Mutex<Vec<String>>>);

impl TraceHandle {
    /// Executed step names, space-joined.
    pub fn as_string(&self) -> String {
        self.0.lock().join(" ")
    }

    /// Executed step names.
    pub fn steps(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn push(&self, name: &str) {
        self.0.lock().push(name.to_string());
    }
}

/// Execution context handed to every step.
pub struct StepContext<'a> {
    flags: &'a RunFlags,
    trace: &'a TraceHandle,
}

impl StepContext<'_> {
    /// Run a nested sequence to completion on this thread. Its step names
    /// are appended to the calling sequence's trace.
    pub fn call(&mut self, sequence: &mut Sequence) -> SequenceResult {
        sequence.run(self.flags, self.trace)
    }

    /// Finish the whole sequence after the current step, regardless of the
    /// step's own result.
    pub fn stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
    }
}

type StepFn = Box<dyn FnMut(&mut StepContext<'_>) -> StepResult + Send>;

struct Step {
    name: String,
    action: StepFn,
}

/// An ordered list of named steps with an observable trace.
pub struct Sequence {
    name: String,
    steps: Vec<Step>,
    trace: TraceHandle,
}

impl Sequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            trace: TraceHandle::default(),
        }
    }

    /// Sequence name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a named step.
    pub fn step(
        &mut self,
        name: impl Into<String>,
        action: impl FnMut(&mut StepContext<'_>) -> StepResult + Send + 'static,
    ) {
        self.steps.push(Step {
            name: name.into(),
            action: Box::new(action),
        });
    }

    /// Handle on the trace this sequence records into when run top-level.
    /// Clone it before handing the sequence to a sequencer.
    pub fn trace(&self) -> TraceHandle {
        self.trace.clone()
    }

    /// Run all steps on the calling thread. Used by the sequencer for the
    /// top-level sequence and by [`StepContext::call`] for nested ones.
    pub(crate) fn run(&mut self, flags: &RunFlags, trace: &TraceHandle) -> SequenceResult {
        let mut index = 0;
        loop {
            if flags.abort.load(Ordering::SeqCst) {
                debug!(sequence = %self.name, "sequence aborted at step boundary");
                return SequenceResult::Aborted;
            }
            let Some(step) = self.steps.get_mut(index) else {
                return SequenceResult::Completed;
            };

            trace.push(&step.name);
            let mut ctx = StepContext { flags, trace };
            let result = (step.action)(&mut ctx);

            if flags.stop.load(Ordering::SeqCst) {
                return SequenceResult::Completed;
            }
            match result {
                StepResult::Next => index += 1,
                StepResult::Goto(target) => {
                    match self.steps.iter().position(|s| s.name == target) {
                        Some(found) => index = found,
                        None => {
                            warn!(sequence = %self.name, target, "goto to unknown step");
                            return SequenceResult::Failed(format!(
                                "unknown step '{target}' in sequence '{}'",
                                self.name
                            ));
                        }
                    }
                }
                StepResult::Done => return SequenceResult::Completed,
            }
        }
    }

    /// Run to completion on the calling thread without a sequencer.
    pub fn run_inline(&mut self) -> SequenceResult {
        let flags = RunFlags::default();
        let trace = self.trace.clone();
        self.run(&flags, &trace)
    }
}
