//! Typed signal carriers and the ports blocks exchange them through.
//!
//! A [`Signal`] is a timestamped value. Each [`Output`] exclusively owns the
//! shared cell it publishes into; any number of [`Input`]s sample that cell.
//! Within a frozen time domain the topological execution order makes a
//! consumer see the value its producer wrote in the same tick; a consumer in
//! another domain sees the last committed value instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::control::time_domain::GraphError;
use crate::time::Timestamp;

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a signal cell, used for graph analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalId(u64);

impl SignalId {
    fn next() -> Self {
        Self(NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A timestamped value written by exactly one producer per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal<T: Copy> {
    /// Carried value.
    pub value: T,
    /// Monotonic time the value was produced.
    pub timestamp: Timestamp,
}

/// Shared storage behind an output port.
///
/// Created by [`Output::new`], never re-allocated. The optional name is set
/// once at wiring time and qualifies log output.
#[derive(Debug)]
pub struct SignalCell<T: Copy> {
    id: SignalId,
    name: RwLock<Option<String>>,
    data: RwLock<Signal<T>>,
}

impl<T: Copy> SignalCell<T> {
    fn new(initial: T) -> Arc<Self> {
        Arc::new(Self {
            id: SignalId::next(),
            name: RwLock::new(None),
            data: RwLock::new(Signal {
                value: initial,
                timestamp: Timestamp::ZERO,
            }),
        })
    }

    /// Cell identity.
    #[inline]
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Signal name, if one was assigned.
    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    /// Last committed signal.
    #[inline]
    pub fn read(&self) -> Signal<T> {
        *self.data.read()
    }

    fn write(&self, signal: Signal<T>) {
        *self.data.write() = signal;
    }
}

/// Object-safe view of an input port, used by the freeze pass.
pub trait InputPort {
    /// Identity of the connected upstream cell, if any.
    fn source_id(&self) -> Option<SignalId>;
    /// Forbid further re-wiring. Called when the enclosing domain freezes.
    fn seal(&mut self);
}

/// Object-safe view of an output port, used by the freeze pass.
pub trait OutputPort {
    /// Identity of the owned cell.
    fn id(&self) -> SignalId;
}

/// Typed output port. Exclusively owns its signal cell.
#[derive(Debug)]
pub struct Output<T: Copy> {
    cell: Arc<SignalCell<T>>,
}

impl<T: Copy + Default> Output<T> {
    /// New output with a default-valued signal at time zero.
    pub fn new() -> Self {
        Self {
            cell: SignalCell::new(T::default()),
        }
    }
}

impl<T: Copy + Default> Default for Output<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> Output<T> {
    /// Commit a value and its timestamp together.
    #[inline]
    pub fn set(&self, value: T, timestamp: Timestamp) {
        self.cell.write(Signal { value, timestamp });
    }

    /// Last committed signal.
    #[inline]
    pub fn signal(&self) -> Signal<T> {
        self.cell.read()
    }

    /// Assign the signal name used in log output.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.cell.name.write() = Some(name.into());
    }

    /// Shared handle on the underlying cell.
    pub fn cell(&self) -> Arc<SignalCell<T>> {
        Arc::clone(&self.cell)
    }
}

impl<T: Copy> OutputPort for Output<T> {
    fn id(&self) -> SignalId {
        self.cell.id
    }
}

/// Typed input port. References at most one upstream output.
#[derive(Debug, Default)]
pub struct Input<T: Copy> {
    source: Option<Arc<SignalCell<T>>>,
    sealed: bool,
}

impl<T: Copy> Input<T> {
    /// New, unconnected input.
    pub fn new() -> Self {
        Self {
            source: None,
            sealed: false,
        }
    }

    /// Wire this input to an upstream output.
    ///
    /// Re-wiring is allowed until the enclosing time domain freezes; after
    /// that the port is sealed and connecting fails.
    pub fn connect(&mut self, output: &Output<T>) -> Result<(), GraphError> {
        if self.sealed {
            return Err(GraphError::SealedPort);
        }
        self.source = Some(output.cell());
        Ok(())
    }

    /// Whether a source is wired.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    /// Sample the connected source, `None` when unconnected.
    #[inline]
    pub fn signal(&self) -> Option<Signal<T>> {
        self.source.as_ref().map(|cell| cell.read())
    }
}

impl<T: Copy> InputPort for Input<T> {
    fn source_id(&self) -> Option<SignalId> {
        self.source.as_ref().map(|cell| cell.id)
    }

    fn seal(&mut self) {
        self.sealed = true;
    }
}
