//! Periodic tasks driven by the executor.
//!
//! A periodic names its period, a body (a whole time domain or a plain
//! callable), optional monitors run after the body, and the set of tasks
//! that must complete before it within the same tick window.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::control::block::BlockError;
use crate::control::time_domain::TimeDomain;
use crate::time::Timestamp;

/// Callable body of a periodic task. Runs on the tick thread.
pub type TaskFn = Box<dyn FnMut(Timestamp) + Send>;

/// Monitor invoked after the body each run.
pub type Monitor = Box<dyn FnMut(&TaskStats) + Send>;

/// What a periodic executes.
pub enum TaskBody {
    /// A whole time domain, ticked on the tick thread for ordering.
    Domain(Arc<Mutex<TimeDomain>>),
    /// An arbitrary callable.
    Callable(TaskFn),
}

/// O(1) per-run timing statistics.
///
/// Updated every run with no allocation.
#[derive(Debug, Clone, Copy)]
pub struct TaskStats {
    /// Total runs executed.
    pub run_count: u64,
    /// Last run duration [ns].
    pub last_ns: i64,
    /// Minimum run duration [ns].
    pub min_ns: i64,
    /// Maximum run duration [ns].
    pub max_ns: i64,
    /// Running sum for average computation.
    pub sum_ns: i64,
    /// Tick time of the most recent run.
    pub last_run: Timestamp,
}

impl TaskStats {
    /// Create a new zeroed stats instance.
    pub const fn new() -> Self {
        Self {
            run_count: 0,
            last_ns: 0,
            min_ns: i64::MAX,
            max_ns: 0,
            sum_ns: 0,
            last_run: Timestamp::ZERO,
        }
    }

    /// Record a run. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, now: Timestamp) {
        self.run_count += 1;
        self.last_ns = duration_ns;
        if duration_ns < self.min_ns {
            self.min_ns = duration_ns;
        }
        if duration_ns > self.max_ns {
            self.max_ns = duration_ns;
        }
        self.sum_ns += duration_ns;
        self.last_run = now;
    }

    /// Average run duration [ns] (0 before the first run).
    #[inline]
    pub fn avg_ns(&self) -> i64 {
        if self.run_count == 0 {
            0
        } else {
            self.sum_ns / self.run_count as i64
        }
    }
}

impl Default for TaskStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A named task executed every `period` seconds by the executor.
pub struct Periodic {
    name: String,
    period: f64,
    body: TaskBody,
    monitors: Vec<Monitor>,
    after: Vec<String>,
    stats: TaskStats,
}

impl Periodic {
    /// Periodic ticking a whole time domain. The period is the domain's.
    pub fn domain(name: impl Into<String>, domain: Arc<Mutex<TimeDomain>>) -> Self {
        let period = domain.lock().period();
        Self {
            name: name.into(),
            period,
            body: TaskBody::Domain(domain),
            monitors: Vec::new(),
            after: Vec::new(),
            stats: TaskStats::new(),
        }
    }

    /// Periodic running an arbitrary callable.
    pub fn callable(
        name: impl Into<String>,
        period: f64,
        body: impl FnMut(Timestamp) + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            period,
            body: TaskBody::Callable(Box::new(body)),
            monitors: Vec::new(),
            after: Vec::new(),
            stats: TaskStats::new(),
        }
    }

    /// Require `predecessor` to complete before this task in every shared
    /// tick window. The predecessor must already be registered when this
    /// task is added to the executor.
    pub fn run_after(&mut self, predecessor: impl Into<String>) {
        self.after.push(predecessor.into());
    }

    /// Attach a monitor invoked after the body each run.
    pub fn add_monitor(&mut self, monitor: impl FnMut(&TaskStats) + Send + 'static) {
        self.monitors.push(Box::new(monitor));
    }

    /// Task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task period [s].
    #[inline]
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Declared predecessors.
    #[inline]
    pub fn predecessors(&self) -> &[String] {
        &self.after
    }

    /// Timing statistics.
    #[inline]
    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    pub(crate) fn body(&self) -> &TaskBody {
        &self.body
    }

    /// Run body and monitors once. A domain-body error is reported to the
    /// caller for fault conversion.
    pub(crate) fn execute(&mut self, now: Timestamp) -> Result<(), BlockError> {
        let start = Instant::now();
        match &mut self.body {
            TaskBody::Domain(domain) => domain.lock().tick(now)?,
            TaskBody::Callable(body) => body(now),
        }
        self.stats.record(start.elapsed().as_nanos() as i64, now);
        for monitor in &mut self.monitors {
            monitor(&self.stats);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[test]
    fn task_stats_record() {
        let mut stats = TaskStats::new();
        assert_eq!(stats.avg_ns(), 0);

        stats.record(500, Timestamp::from_nanos(1_000));
        stats.record(700, Timestamp::from_nanos(2_000));
        assert_eq!(stats.run_count, 2);
        assert_eq!(stats.min_ns, 500);
        assert_eq!(stats.max_ns, 700);
        assert_eq!(stats.avg_ns(), 600);
        assert_eq!(stats.last_run, Timestamp::from_nanos(2_000));
    }

    #[test]
    fn callable_body_and_monitor_run_in_order() {
        let order = Arc::new(AtomicU64::new(0));
        let body_seen = Arc::new(AtomicU64::new(0));
        let monitor_seen = Arc::new(AtomicU64::new(0));

        let mut task = Periodic::callable("t", 0.001, {
            let order = order.clone();
            let body_seen = body_seen.clone();
            move |_| body_seen.store(order.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst)
        });
        task.add_monitor({
            let order = order.clone();
            let monitor_seen = monitor_seen.clone();
            move |stats| {
                assert_eq!(stats.run_count, 1);
                monitor_seen.store(order.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
            }
        });

        task.execute(Timestamp::from_nanos(5)).unwrap();
        assert_eq!(body_seen.load(Ordering::SeqCst), 1);
        assert_eq!(monitor_seen.load(Ordering::SeqCst), 2);
        assert_eq!(task.stats().run_count, 1);
        assert_eq!(task.stats().last_run, Timestamp::from_nanos(5));
    }

    #[test]
    fn domain_body_takes_domain_period() {
        let domain = Arc::new(Mutex::new(TimeDomain::new("td", 0.004)));
        let task = Periodic::domain("t", domain);
        assert_eq!(task.period(), 0.004);
    }

    #[test]
    fn predecessors_accumulate() {
        let mut task = Periodic::callable("t", 0.001, |_| {});
        task.run_after("a");
        task.run_after("b");
        assert_eq!(task.predecessors(), ["a".to_string(), "b".to_string()]);
    }
}
