//! Monotonic timestamps shared by signals and ticks.
//!
//! All values are nanoseconds on a process-local monotonic clock anchored at
//! first use. Wall-clock time never enters the framework; comparing
//! timestamps from different processes is meaningless.

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds on the process-local monotonic clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock anchor itself.
    pub const ZERO: Self = Self(0);

    /// Current monotonic time.
    ///
    /// The first call anchors the clock; all later calls are relative to it.
    pub fn now() -> Self {
        let epoch = EPOCH.get_or_init(Instant::now);
        Self(epoch.elapsed().as_nanos() as u64)
    }

    /// Construct from a raw nanosecond count.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Raw nanosecond count.
    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Signed distance to an earlier timestamp [ns].
    #[inline]
    pub const fn nanos_since(&self, earlier: Timestamp) -> i64 {
        self.0 as i64 - earlier.0 as i64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[cfg(feature = "rt")]
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Total nanoseconds in a kernel timespec.
#[cfg(feature = "rt")]
pub(crate) fn timespec_total_ns(ts: &nix::sys::time::TimeSpec) -> i64 {
    ts.tv_sec() * NANOS_PER_SEC + ts.tv_nsec()
}

/// Kernel timespec from total nanoseconds. The nanosecond field stays in
/// `[0, 1s)` as the kernel requires, also for negative totals.
#[cfg(feature = "rt")]
pub(crate) fn total_ns_timespec(ns: i64) -> nix::sys::time::TimeSpec {
    nix::sys::time::TimeSpec::new(ns.div_euclid(NANOS_PER_SEC), ns.rem_euclid(NANOS_PER_SEC))
}
