//! The cooperative driver thread.
//!
//! One sequencer owns one thread and drives one top-level sequence at a
//! time. Steps never run concurrently with each other; abort requests are
//! observed at step boundaries only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use crate::sequence::{RunFlags, Sequence, SequenceResult};

struct Shared {
    flags: RunFlags,
    terminated: AtomicBool,
    result: Mutex<Option<SequenceResult>>,
    done: Condvar,
}

/// Owns a cooperative thread advancing a sequence.
pub struct Sequencer {
    name: String,
    shared: Arc<Shared>,
    started: bool,
}

impl Sequencer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                flags: RunFlags::default(),
                terminated: AtomicBool::new(false),
                result: Mutex::new(None),
                done: Condvar::new(),
            }),
            started: false,
        }
    }

    /// Sequencer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the driver thread and start `sequence`.
    ///
    /// Clone the sequence's [`trace`](Sequence::trace) handle first if the
    /// executed step names are needed afterwards. A second start on the
    /// same sequencer is ignored.
    pub fn start(&mut self, mut sequence: Sequence) {
        if self.started {
            warn!(sequencer = %self.name, "already started; ignoring");
            return;
        }
        self.started = true;

        let shared = Arc::clone(&self.shared);
        let sequencer_name = self.name.clone();
        let builder = std::thread::Builder::new().name(format!("sequencer-{}", self.name));
        let spawned = builder.spawn(move || {
            info!(
                sequencer = %sequencer_name,
                sequence = %sequence.name(),
                "sequence started"
            );
            let trace = sequence.trace();
            let result = sequence.run(&shared.flags, &trace);
            info!(
                sequencer = %sequencer_name,
                sequence = %sequence.name(),
                result = ?result,
                "sequence finished"
            );

            *shared.result.lock() = Some(result);
            shared.terminated.store(true, Ordering::SeqCst);
            shared.done.notify_all();
        });

        if let Err(e) = spawned {
            error!(sequencer = %self.name, error = %e, "sequencer thread failed to spawn");
            *self.shared.result.lock() = Some(SequenceResult::Failed(e.to_string()));
            self.shared.terminated.store(true, Ordering::SeqCst);
            self.shared.done.notify_all();
        }
    }

    /// Whether the driven sequence has finished.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    /// Request exit at the next step boundary.
    pub fn abort(&self) {
        self.shared.flags.abort.store(true, Ordering::SeqCst);
    }

    /// Block until the driven sequence finishes and return its result.
    ///
    /// Returns `Completed` immediately when `start` was never called.
    pub fn join(&self) -> SequenceResult {
        if !self.started {
            return SequenceResult::Completed;
        }
        let mut result = self.shared.result.lock();
        while result.is_none() {
            self.shared.done.wait(&mut result);
        }
        result.clone().expect("result set before notify")
    }

    /// Result of the driven sequence, when it has finished.
    pub fn result(&self) -> Option<SequenceResult> {
        self.shared.result.lock().clone()
    }
}
