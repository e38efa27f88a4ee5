//! Process-wide shutdown channel.
//!
//! A single static flag is the only state a signal handler touches; the
//! executor polls it at tick boundaries. `request_stop()` is the idempotent
//! programmatic entry used by the safety system's exit handler.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Arm the process-wide stop flag. Idempotent and async-signal-safe.
#[inline]
pub fn request_stop() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Whether a stop has been requested.
#[inline]
pub fn stop_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Clear the flag. Intended for tests and for re-running an executor in the
/// same process after a clean stop.
#[inline]
pub fn reset() {
    SHUTDOWN.store(false, Ordering::SeqCst);
}

/// Failure installing the SIGINT handler.
#[derive(Debug, Error)]
#[error("failed to install SIGINT handler: {0}")]
pub struct SignalSetupError(String);

extern "C" fn on_sigint(_: libc::c_int) {
    // Only the atomic store happens at handler level.
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT into the shutdown flag.
///
/// The handler performs a single atomic store; everything else happens on
/// the tick thread at the next tick boundary.
pub fn install_sigint_handler() -> Result<(), SignalSetupError> {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to a static atomic.
    unsafe { sigaction(Signal::SIGINT, &action) }
        .map(|_| ())
        .map_err(|e| SignalSetupError(e.to_string()))
}
