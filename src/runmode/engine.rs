use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RunModeError;
use crate::metrics::ResultSink;
use crate::phase::TestSuite;
use crate::runner::TestRunner;

use super::context::{RunContext, WorkerSet};
use super::{RunMode, RunModeChanges};

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(25);
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(50);
const ABORT_SETTLE_POLLS: u32 = 50;

/// Executes one agent's share of a phase under a run mode.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct RunModeEngine {
    inner: Arc<EngineInner>,
}

pub(super) struct EngineInner {
    pub(super) suite: Arc<TestSuite>,
    pub(super) runner: Arc<dyn TestRunner>,
    pub(super) sink: Arc<ResultSink>,
    pub(super) wait_time_ms: AtomicU64,
    pub(super) round_interval_ms: AtomicU64,
    pub(super) pool: Arc<Semaphore>,
    /// Set when the ramp ended a `Normal` run or the engine was shut down.
    pub(super) stopped: AtomicBool,
    grace: Duration,
    started_at: Instant,
    state: Mutex<EngineState>,
}

pub(super) struct EngineState {
    pub(super) mode: RunMode,
    pub(super) workers: WorkerSet,
    /// Reusable per-round buffers of claimed test indices (`ConstantLoad`).
    pub(super) round_slots: Vec<Option<usize>>,
    pub(super) pool_size: u64,
    ramp_task: Option<JoinHandle<()>>,
    ramp_generation: u64,
}

impl RunModeEngine {
    #[must_use]
    pub fn new(
        mode: RunMode,
        suite: Arc<TestSuite>,
        runner: Arc<dyn TestRunner>,
        sink: Arc<ResultSink>,
        grace: Duration,
    ) -> Self {
        let (wait_time_ms, round_interval_ms, pool_size) = match &mode {
            RunMode::Normal(normal) => (normal.wait_time_ms, 0, 0),
            RunMode::ConstantLoad(constant) => {
                (0, constant.round_interval_ms, constant.pool_size.max(1))
            }
        };
        let permits = usize::try_from(pool_size).unwrap_or(Semaphore::MAX_PERMITS);
        Self {
            inner: Arc::new(EngineInner {
                suite,
                runner,
                sink,
                wait_time_ms: AtomicU64::new(wait_time_ms),
                round_interval_ms: AtomicU64::new(round_interval_ms),
                pool: Arc::new(Semaphore::new(permits.min(Semaphore::MAX_PERMITS))),
                stopped: AtomicBool::new(false),
                grace,
                started_at: Instant::now(),
                state: Mutex::new(EngineState {
                    mode,
                    workers: WorkerSet::default(),
                    round_slots: Vec::new(),
                    pool_size,
                    ramp_task: None,
                    ramp_generation: 0,
                }),
            }),
        }
    }

    /// Spawn the initial workers and schedule the ramp, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned or the worker set
    /// violates its size invariant.
    pub fn start(&self) -> Result<(), RunModeError> {
        let mut state = self.inner.lock_state()?;
        self.inner.launch(&mut state)?;
        if let Some(ramp) = state.mode.ramp() {
            let delay = ramp.initial_delay();
            self.inner.schedule_ramp(&mut state, delay);
        }
        Ok(())
    }

    /// Apply a live run mode delta without restarting the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize invariant is violated; the engine must
    /// then be treated as faulty.
    pub fn rebalance(&self, changes: &RunModeChanges) -> Result<(), RunModeError> {
        self.inner.rebalance(changes)
    }

    /// Restart a finished engine when its suite still has work, e.g. after a
    /// redistribution raised its counts. Returns whether it restarted.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned or the resize invariant
    /// is violated.
    pub fn restart_if_idle(&self) -> Result<bool, RunModeError> {
        if self.inner.suite.is_exhausted() {
            return Ok(false);
        }
        let mut state = self.inner.lock_state()?;
        let idle = state.workers.all_exited()
            && (self.inner.stopped.load(Ordering::Acquire) || effective_level(&state.mode) > 0);
        if !idle {
            return Ok(false);
        }
        self.inner.stopped.store(false, Ordering::Release);
        state.workers.reap();
        self.inner.launch(&mut state)?;
        if state.mode.ramp().is_some() {
            let delay = self.inner.remaining_initial_delay(&state.mode);
            self.inner.schedule_ramp(&mut state, delay);
        }
        info!("Engine restarted with remaining work");
        Ok(true)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Resolve once the engine has finished.
    pub async fn wait_finished(&self) {
        while !self.is_finished() {
            tokio::time::sleep(FINISH_POLL_INTERVAL).await;
        }
    }

    #[must_use]
    pub fn mode(&self) -> Option<RunMode> {
        self.inner.lock_state().ok().map(|state| state.mode.clone())
    }

    #[must_use]
    pub fn context(&self) -> Option<RunContext> {
        let finished = self.is_finished();
        let mut state = self.inner.lock_state().ok()?;
        state.workers.reap();
        Some(state.workers.snapshot(finished))
    }

    #[must_use]
    pub fn suite(&self) -> &Arc<TestSuite> {
        &self.inner.suite
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<ResultSink> {
        &self.inner.sink
    }

    /// Signal every worker to stop, wait up to the grace period for them to
    /// exit, then abort the stragglers.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        match self.inner.lock_state() {
            Ok(mut state) => {
                state.cancel_ramp();
                state.workers.signal_all();
            }
            Err(err) => {
                error!("Cannot signal workers: {}", err);
                return;
            }
        }

        let deadline = Instant::now()
            .checked_add(self.inner.grace)
            .unwrap_or_else(Instant::now);
        loop {
            let exited = self
                .inner
                .lock_state()
                .map(|state| state.workers.all_exited())
                .unwrap_or(true);
            if exited {
                debug!("All workers exited");
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        if let Ok(mut state) = self.inner.lock_state() {
            let aborted = state.workers.abort_running();
            if aborted > 0 {
                warn!(
                    "Aborted {} worker(s) still running after {}ms grace period",
                    aborted,
                    self.inner.grace.as_millis()
                );
            }
        }
        // Aborted tasks are torn down on their next poll.
        for _ in 0..ABORT_SETTLE_POLLS {
            let exited = self
                .inner
                .lock_state()
                .map(|state| state.workers.all_exited())
                .unwrap_or(true);
            if exited {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        debug!("Aborted workers still tearing down");
    }
}

impl EngineInner {
    pub(super) fn lock_state(&self) -> Result<MutexGuard<'_, EngineState>, RunModeError> {
        self.state.lock().map_err(|_| RunModeError::StatePoisoned)
    }

    fn is_finished(&self) -> bool {
        let Ok(state) = self.lock_state() else {
            return true;
        };
        let exited = state.workers.all_exited();
        exited && (self.stopped.load(Ordering::Acquire) || self.suite.is_exhausted())
    }

    /// Bring the engine up to its current level.
    fn launch(self: &Arc<Self>, state: &mut EngineState) -> Result<(), RunModeError> {
        let target = effective_level(&state.mode);
        if state.mode.is_normal() {
            self.resize_workers(state, target)
        } else {
            state.resize_round_slots(target);
            self.ensure_round_loop(state);
            Ok(())
        }
    }

    fn rebalance(self: &Arc<Self>, changes: &RunModeChanges) -> Result<(), RunModeError> {
        let mut state = self.lock_state()?;
        self.before(&mut state, changes)?;
        self.apply(&mut state, changes);
        self.after(&mut state, changes);
        Ok(())
    }

    pub(super) fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn remaining_initial_delay(&self, mode: &RunMode) -> Duration {
        mode.ramp()
            .map(|ramp| ramp.initial_delay().saturating_sub(self.elapsed()))
            .unwrap_or_default()
    }

    pub(super) fn schedule_ramp(self: &Arc<Self>, state: &mut EngineState, delay: Duration) {
        state.cancel_ramp();
        let Some(ramp) = state.mode.ramp().cloned() else {
            return;
        };
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let generation = state.ramp_generation;
        let engine: Weak<EngineInner> = Arc::downgrade(self);
        let period = ramp.interval().max(Duration::from_millis(1));
        state.ramp_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let first_tick = tokio::time::Instant::now()
                .checked_add(period)
                .unwrap_or_else(tokio::time::Instant::now);
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if !engine.ramp_tick(generation) {
                    break;
                }
            }
        }));
    }

    /// One ramp step. Returns whether the ramp keeps running.
    fn ramp_tick(self: &Arc<Self>, generation: u64) -> bool {
        let Ok(mut state) = self.lock_state() else {
            return false;
        };
        if state.ramp_generation != generation {
            return false;
        }
        let Some(ramp) = state.mode.ramp().cloned() else {
            return false;
        };
        let current = state.mode.level();
        if current == ramp.end {
            state.ramp_task = None;
            if state.mode.is_normal() {
                info!("Ramp reached {}; finishing all workers", ramp.end);
                self.stopped.store(true, Ordering::Release);
                state.workers.signal_all();
            } else {
                debug!("Ramp reached {}; holding load", ramp.end);
            }
            return false;
        }

        let next = ramp.step(current);
        let target = usize::try_from(next).unwrap_or(usize::MAX);
        let resized = if state.mode.is_normal() {
            self.resize_workers(&mut state, target)
        } else {
            state.resize_round_slots(target);
            Ok(())
        };
        if let Err(err) = resized {
            error!("Ramp step to {} failed: {}", next, err);
            state.ramp_task = None;
            return false;
        }
        debug!("Ramp step {} -> {}", current, next);
        state.mode.set_level(next);
        true
    }

    pub(super) fn sync_pool_size(&self, state: &mut EngineState, pool_size: u64) {
        let pool_size = pool_size.max(1);
        if pool_size > state.pool_size {
            let extra = usize::try_from(pool_size.saturating_sub(state.pool_size)).unwrap_or(0);
            self.pool.add_permits(extra.min(Semaphore::MAX_PERMITS));
        } else if pool_size < state.pool_size {
            let fewer = usize::try_from(state.pool_size.saturating_sub(pool_size)).unwrap_or(0);
            let forgotten = self.pool.forget_permits(fewer);
            if forgotten < fewer {
                debug!(
                    "Pool shrink deferred: {} of {} permits in use",
                    fewer.saturating_sub(forgotten),
                    fewer
                );
            }
        }
        state.pool_size = pool_size;
    }
}

impl EngineState {
    pub(super) fn cancel_ramp(&mut self) {
        self.ramp_generation = self.ramp_generation.wrapping_add(1);
        if let Some(task) = self.ramp_task.take() {
            task.abort();
        }
    }
}

/// Workers or slots to run at the mode's current level.
///
/// Without a ramp nothing would ever raise a zero level again, so a zero share
/// still runs one unit to drain its quota.
pub(super) fn effective_level(mode: &RunMode) -> usize {
    let level = usize::try_from(mode.level()).unwrap_or(usize::MAX);
    if mode.ramp().is_some() {
        level
    } else {
        level.max(1)
    }
}
