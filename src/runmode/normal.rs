use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::error::RunModeError;

use super::context::{WorkerHandle, WorkerRuns, bump_runs};
use super::engine::{EngineInner, EngineState};

impl EngineInner {
    /// Spawn or retire persistent workers until exactly `target` are live.
    pub(super) fn resize_workers(
        self: &Arc<Self>,
        state: &mut EngineState,
        target: usize,
    ) -> Result<(), RunModeError> {
        state.workers.reap();
        let live = state.workers.live_count();
        if target > live {
            for _ in live..target {
                let (id, finish, runs) = state.workers.next_worker();
                let task = tokio::spawn(run_worker(
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
            debug!("Spawned {} worker(s)", target.saturating_sub(live));
        } else if target < live {
            state.workers.retire(live.saturating_sub(target));
            debug!("Retired {} worker(s)", live.saturating_sub(target));
        }
        state.workers.verify(target)
    }
}

/// Claim, run, wait; until told to finish or the suite runs dry.
async fn run_worker(engine: Arc<EngineInner>, finish: Arc<AtomicBool>, runs: WorkerRuns) {
    loop {
        if finish.load(Ordering::Acquire) {
            break;
        }
        let Some(idx) = engine.suite.claim_next() else {
            break;
        };
        let Some(test) = engine.suite.test(idx) else {
            break;
        };
        engine.runner.run_test(test, &engine.sink).await;
        engine.suite.mark_completed(idx);
        bump_runs(&runs, &test.name);

        let wait_ms = engine.wait_time_ms.load(Ordering::Acquire);
        if wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }
}
