//! The deterministic tick loop: main task first, then ordered periodics.
//!
//! The executor derives its clock from the main task's period P. Periodics
//! with period k·P run every k-th tick, after the main task, in a
//! topological order of their declared predecessors. The loop paces itself
//! with `clock_nanosleep(TIMER_ABSTIME)` on `CLOCK_MONOTONIC` when the `rt`
//! feature is enabled and with `std::thread::sleep` otherwise.
//!
//! A stop request (handle, or the process-wide shutdown flag) is observed at
//! the tick boundary; the in-progress tick always runs to completion.
//! Overruns never abort: the next tick starts immediately and two
//! consecutive overruns raise a warning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::control::block::BlockError;
use crate::control::time_domain::GraphError;
use crate::task::periodic::{Periodic, TaskBody};
use crate::task::shutdown;
use crate::time::Timestamp;

/// What the main task tells the executor after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickDirective {
    /// Keep ticking.
    Continue,
    /// Clean stop at this tick boundary.
    Stop,
    /// Unrecoverable fault; the executor returns an error.
    Abort(String),
}

/// The task executed first in every tick. Its period defines the tick.
pub trait MainTask: Send {
    /// Task name for logging.
    fn name(&self) -> &str;

    /// Tick period [s].
    fn period(&self) -> f64;

    /// One-time preparation before the first tick (graph freezing).
    fn startup(&mut self) -> Result<(), GraphError> {
        Ok(())
    }

    /// Execute one tick.
    fn tick(&mut self, now: Timestamp) -> TickDirective;

    /// A registered periodic faulted. Default: abort.
    fn on_fault(&mut self, task: &str, error: &BlockError) -> TickDirective {
        TickDirective::Abort(format!("unhandled fault in periodic '{task}': {error}"))
    }
}

/// Errors from executor configuration or the tick loop.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// `add()` or `run()` without a main task.
    #[error("no main task registered")]
    NoMainTask,

    /// Main task period must be positive and finite.
    #[error("invalid main task period: {0}s")]
    InvalidPeriod(f64),

    /// Periodic names must be unique.
    #[error("periodic '{0}' is already registered")]
    DuplicateTask(String),

    /// A predecessor must be registered before its successor.
    #[error("periodic '{task}' lists unknown predecessor '{predecessor}'")]
    UnknownPredecessor { task: String, predecessor: String },

    /// The `after` relation must stay acyclic.
    #[error("'after' ordering cycle involving periodic '{task}'")]
    PredecessorCycle { task: String },

    /// Periodic periods must be positive multiples of the main period.
    #[error("periodic '{task}' period {period}s is not a positive multiple of {main}s")]
    PeriodMismatch {
        task: String,
        period: f64,
        main: f64,
    },

    /// Graph error while freezing time domains at start.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The main task aborted the loop.
    #[error("main task aborted: {0}")]
    MainTaskFault(String),

    /// RT clock syscall failed (only with the `rt` feature).
    #[error("RT clock error: {0}")]
    RtClock(String),
}

/// O(1) per-tick timing statistics.
#[derive(Debug, Clone, Copy)]
pub struct TickStats {
    /// Total ticks executed.
    pub tick_count: u64,
    /// Last tick duration [ns].
    pub last_ns: i64,
    /// Minimum tick duration [ns].
    pub min_ns: i64,
    /// Maximum tick duration [ns].
    pub max_ns: i64,
    /// Running sum for average computation.
    pub sum_ns: i64,
    /// Number of overruns detected.
    pub overruns: u64,
}

impl TickStats {
    /// Create a new zeroed stats instance.
    pub const fn new() -> Self {
        Self {
            tick_count: 0,
            last_ns: 0,
            min_ns: i64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overruns: 0,
        }
    }

    #[inline]
    fn record(&mut self, duration_ns: i64) {
        self.tick_count += 1;
        self.last_ns = duration_ns;
        if duration_ns < self.min_ns {
            self.min_ns = duration_ns;
        }
        if duration_ns > self.max_ns {
            self.max_ns = duration_ns;
        }
        self.sum_ns += duration_ns;
    }

    /// Average tick duration [ns] (0 before the first tick).
    #[inline]
    pub fn avg_ns(&self) -> i64 {
        if self.tick_count == 0 {
            0
        } else {
            self.sum_ns / self.tick_count as i64
        }
    }
}

impl Default for TickStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable stop control for a running executor.
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    stop: Arc<AtomicBool>,
}

impl ExecutorHandle {
    /// Arm the stop flag; the in-progress tick completes first.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct ScheduledTask {
    task: Periodic,
    /// Runs every `rate`-th tick.
    rate: u64,
}

/// Owns the clock, the task graph and the scheduling loop.
///
/// Exactly one executor should be live per process; construct it explicitly
/// and keep it on the thread that will run the tick loop.
pub struct Executor {
    main: Option<Box<dyn MainTask>>,
    tasks: Vec<ScheduledTask>,
    order: Vec<usize>,
    stop: Arc<AtomicBool>,
    stats: TickStats,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            main: None,
            tasks: Vec::new(),
            order: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            stats: TickStats::new(),
        }
    }

    /// Register the main task; its period defines the tick.
    pub fn set_main_task(&mut self, task: impl MainTask + 'static) {
        self.main = Some(Box::new(task));
    }

    /// Register an extra periodic task.
    ///
    /// The main task must be set first (its period anchors the rate). All
    /// predecessors named in `after` must already be registered, which keeps
    /// the ordering relation acyclic by construction; self-references are
    /// rejected explicitly.
    pub fn add(&mut self, periodic: Periodic) -> Result<(), ExecutorError> {
        let main_period = self
            .main
            .as_ref()
            .map(|m| m.period())
            .ok_or(ExecutorError::NoMainTask)?;
        if !(main_period > 0.0) || !main_period.is_finite() {
            return Err(ExecutorError::InvalidPeriod(main_period));
        }

        if self.tasks.iter().any(|st| st.task.name() == periodic.name()) {
            return Err(ExecutorError::DuplicateTask(periodic.name().to_string()));
        }

        let ratio = periodic.period() / main_period;
        let rate = ratio.round();
        if !(rate >= 1.0) || !rate.is_finite() {
            return Err(ExecutorError::PeriodMismatch {
                task: periodic.name().to_string(),
                period: periodic.period(),
                main: main_period,
            });
        }
        if (ratio - rate).abs() > 1e-6 {
            warn!(
                task = periodic.name(),
                period_s = periodic.period(),
                main_s = main_period,
                "periodic period is not an integer multiple of the tick; rounding"
            );
        }

        for predecessor in periodic.predecessors() {
            if predecessor == periodic.name() {
                return Err(ExecutorError::PredecessorCycle {
                    task: periodic.name().to_string(),
                });
            }
            if !self.tasks.iter().any(|st| st.task.name() == predecessor) {
                return Err(ExecutorError::UnknownPredecessor {
                    task: periodic.name().to_string(),
                    predecessor: predecessor.clone(),
                });
            }
        }

        self.tasks.push(ScheduledTask {
            task: periodic,
            rate: rate as u64,
        });
        self.order = self.compute_order()?;
        Ok(())
    }

    /// Topological order of the `after` relation, stable with respect to
    /// registration order.
    fn compute_order(&self) -> Result<Vec<usize>, ExecutorError> {
        let n = self.tasks.len();
        let index_of = |name: &str| self.tasks.iter().position(|st| st.task.name() == name);

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree: Vec<usize> = vec![0; n];
        for (idx, st) in self.tasks.iter().enumerate() {
            for predecessor in st.task.predecessors() {
                let pred_idx = index_of(predecessor).expect("predecessors validated at add()");
                successors[pred_idx].push(idx);
                indegree[idx] += 1;
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut cursor = 0;
        while cursor < ready.len() {
            let idx = ready[cursor];
            cursor += 1;
            order.push(idx);
            for &succ in &successors[idx] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.push(succ);
                }
            }
        }

        if order.len() != n {
            let culprit = (0..n)
                .find(|&i| indegree[i] > 0)
                .expect("cycle implies a task with remaining indegree");
            return Err(ExecutorError::PredecessorCycle {
                task: self.tasks[culprit].task.name().to_string(),
            });
        }
        Ok(order)
    }

    /// Cloneable stop control.
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Arm the stop flag; the in-progress tick completes first.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Tick statistics.
    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Enter the scheduling loop.
    ///
    /// Freezes every registered time domain first; graph errors are fatal.
    /// Returns `Ok` on a clean stop and an error when the main task aborts.
    pub fn run(&mut self) -> Result<(), ExecutorError> {
        let (period, main_name) = {
            let main = self.main.as_mut().ok_or(ExecutorError::NoMainTask)?;
            let period = main.period();
            if !(period > 0.0) || !period.is_finite() {
                return Err(ExecutorError::InvalidPeriod(period));
            }
            main.startup()?;
            (period, main.name().to_string())
        };
        for st in &self.tasks {
            if let TaskBody::Domain(domain) = st.task.body() {
                domain.lock().freeze()?;
            }
        }

        let period_ns = (period * 1e9) as i64;
        info!(
            main = %main_name,
            period_s = period,
            periodics = self.tasks.len(),
            "executor entering tick loop"
        );

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop(period_ns);
        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop(period_ns);

        match &result {
            Ok(()) => info!(
                ticks = self.stats.tick_count,
                overruns = self.stats.overruns,
                "executor stopped"
            ),
            Err(e) => error!(error = %e, "executor aborted"),
        }
        result
    }

    #[inline]
    fn stop_armed(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || shutdown::stop_requested()
    }

    /// Main task, then every due periodic in `after` order.
    ///
    /// Returns `Some(result)` when the loop must end.
    fn dispatch_tick(
        &mut self,
        tick_index: u64,
        now: Timestamp,
    ) -> Option<Result<(), ExecutorError>> {
        let main = self.main.as_mut().expect("main task present in tick loop");
        match main.tick(now) {
            TickDirective::Continue => {}
            TickDirective::Stop => return Some(Ok(())),
            TickDirective::Abort(reason) => {
                return Some(Err(ExecutorError::MainTaskFault(reason)));
            }
        }

        for idx in 0..self.order.len() {
            let slot = self.order[idx];
            if tick_index % self.tasks[slot].rate != 0 {
                continue;
            }
            if let Err(e) = self.tasks[slot].task.execute(now) {
                error!(task = self.tasks[slot].task.name(), error = %e, "periodic task fault");
                let main = self.main.as_mut().expect("main task present in tick loop");
                match main.on_fault(self.tasks[slot].task.name(), &e) {
                    TickDirective::Continue => {}
                    TickDirective::Stop => return Some(Ok(())),
                    TickDirective::Abort(reason) => {
                        return Some(Err(ExecutorError::MainTaskFault(reason)));
                    }
                }
            }
        }
        None
    }

    fn note_overrun(&mut self, duration_ns: i64, period_ns: i64, consecutive: &mut u32) -> bool {
        if duration_ns > period_ns {
            self.stats.overruns += 1;
            *consecutive += 1;
            if *consecutive == 2 {
                warn!(
                    duration_ns,
                    budget_ns = period_ns,
                    "two consecutive tick overruns"
                );
            }
            true
        } else {
            *consecutive = 0;
            false
        }
    }

    /// Simulation loop paced with `std::thread::sleep`.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self, period_ns: i64) -> Result<(), ExecutorError> {
        use std::time::{Duration, Instant};

        let period = Duration::from_nanos(period_ns as u64);
        let mut tick_index: u64 = 0;
        let mut consecutive_overruns: u32 = 0;

        loop {
            if self.stop_armed() {
                return Ok(());
            }

            let start = Instant::now();
            let now = Timestamp::now();
            if let Some(result) = self.dispatch_tick(tick_index, now) {
                return result;
            }
            tick_index += 1;

            let elapsed = start.elapsed();
            let duration_ns = elapsed.as_nanos() as i64;
            self.stats.record(duration_ns);

            // On overrun the next tick starts immediately.
            if !self.note_overrun(duration_ns, period_ns, &mut consecutive_overruns) {
                std::thread::sleep(period - elapsed);
            }
        }
    }

    /// RT loop with absolute-time sleep on `CLOCK_MONOTONIC` for drift-free
    /// pacing. All wake-time arithmetic runs on total nanoseconds; timespec
    /// conversion happens only at the clock boundary.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self, period_ns: i64) -> Result<(), ExecutorError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        use crate::time::{timespec_total_ns, total_ns_timespec};

        let clock = ClockId::CLOCK_MONOTONIC;
        let now_ns = |clock: ClockId| {
            clock_gettime(clock)
                .map(|ts| timespec_total_ns(&ts))
                .map_err(|e| ExecutorError::RtClock(e.to_string()))
        };

        let mut next_wake_ns = now_ns(clock)?;
        let mut tick_index: u64 = 0;
        let mut consecutive_overruns: u32 = 0;

        loop {
            if self.stop_armed() {
                return Ok(());
            }

            next_wake_ns += period_ns;

            let start_ns = now_ns(clock)?;
            let now = Timestamp::now();
            if let Some(result) = self.dispatch_tick(tick_index, now) {
                return result;
            }
            tick_index += 1;

            let end_ns = now_ns(clock)?;
            let duration_ns = end_ns - start_ns;
            self.stats.record(duration_ns);

            if self.note_overrun(duration_ns, period_ns, &mut consecutive_overruns) {
                // Re-anchor so the next tick starts immediately.
                next_wake_ns = end_ns;
            } else {
                let _ = clock_nanosleep(
                    clock,
                    ClockNanosleepFlags::TIMER_ABSTIME,
                    &total_ns_timespec(next_wake_ns),
                );
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepare the calling thread for deterministic execution: lock memory pages
/// and switch to `SCHED_FIFO` at the given priority.
///
/// No-op without the `rt` feature.
#[cfg(feature = "rt")]
pub fn rt_setup(rt_priority: i32) -> Result<(), ExecutorError> {
    use nix::sys::mman::{MlockallFlags, mlockall};

    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| ExecutorError::RtClock(format!("mlockall failed: {e}")))?;

    let param = libc::sched_param {
        sched_priority: rt_priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(ExecutorError::RtClock(format!(
            "sched_setscheduler(SCHED_FIFO, {rt_priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub fn rt_setup(_rt_priority: i32) -> Result<(), ExecutorError> {
    Ok(()) // No-op in simulation mode
}
