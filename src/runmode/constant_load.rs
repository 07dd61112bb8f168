use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::debug;

use super::context::{WorkerHandle, WorkerRuns, bump_runs};
use super::engine::{EngineInner, EngineState};

impl EngineState {
    /// Grow or shrink the per-round buffers to `target` slots.
    pub(super) fn resize_round_slots(&mut self, target: usize) {
        if target != self.round_slots.len() {
            debug!("Round slots {} -> {}", self.round_slots.len(), target);
        }
        self.round_slots.resize(target, None);
    }
}

impl EngineInner {
    /// Make sure the round loop is running; a finished loop is replaced.
    pub(super) fn ensure_round_loop(self: &Arc<Self>, state: &mut EngineState) {
        state.workers.reap();
        if state.workers.live_count() > 0 {
            return;
        }
        let (id, finish, runs) = state.workers.next_worker();
        let task = tokio::spawn(run_rounds(
            Arc::clone(self),
            Arc::clone(&finish),
            Arc::clone(&runs),
        ));
        state.workers.push(WorkerHandle {
            id,
            finish,
            runs,
            task,
        });
    }

    /// Fill every round slot with a claimed test; returns the claims.
    fn claim_round(&self) -> Vec<usize> {
        let Ok(mut state) = self.lock_state() else {
            return Vec::new();
        };
        for slot in &mut state.round_slots {
            *slot = self.suite.claim_next();
        }
        state.round_slots.iter().filter_map(|slot| *slot).collect()
    }
}

/// Submit one round of executions to the shared pool, then sleep a fixed
/// interval however long the executions take.
async fn run_rounds(engine: Arc<EngineInner>, finish: Arc<AtomicBool>, runs: WorkerRuns) {
    let mut in_flight = JoinSet::new();
    loop {
        if finish.load(Ordering::Acquire) {
            break;
        }
        while in_flight.try_join_next().is_some() {}

        let claimed = engine.claim_round();
        if claimed.is_empty() && engine.suite.is_exhausted() {
            break;
        }
        for idx in claimed {
            let Ok(permit) = Arc::clone(&engine.pool).acquire_owned().await else {
                break;
            };
            let engine = Arc::clone(&engine);
            let runs = Arc::clone(&runs);
            in_flight.spawn(async move {
                if let Some(test) = engine.suite.test(idx) {
                    engine.runner.run_test(test, &engine.sink).await;
                    engine.suite.mark_completed(idx);
                    bump_runs(&runs, &test.name);
                }
                drop(permit);
            });
        }

        let interval_ms = engine.round_interval_ms.load(Ordering::Acquire);
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }
    while in_flight.join_next().await.is_some() {}
}
