use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::RunModeError;

/// Executions per test performed by one worker.
pub type WorkerRuns = Arc<Mutex<BTreeMap<String, u64>>>;

pub(super) fn bump_runs(runs: &WorkerRuns, test: &str) {
    if let Ok(mut runs) = runs.lock() {
        let entry = runs.entry(test.to_owned()).or_insert(0);
        *entry = entry.saturating_add(1);
    }
}

pub(super) struct WorkerHandle {
    pub(super) id: u64,
    pub(super) finish: Arc<AtomicBool>,
    pub(super) runs: WorkerRuns,
    pub(super) task: JoinHandle<()>,
}

impl WorkerHandle {
    fn signal_finish(&self) {
        self.finish.store(true, Ordering::Release);
    }

    fn is_signalled(&self) -> bool {
        self.finish.load(Ordering::Acquire)
    }

    fn has_exited(&self) -> bool {
        self.task.is_finished()
    }
}

/// Live and retiring workers of one engine.
///
/// Retired workers keep running until they observe their finish flag; they
/// are no longer counted as live.
#[derive(Default)]
pub(super) struct WorkerSet {
    live: Vec<WorkerHandle>,
    retiring: Vec<WorkerHandle>,
    next_id: u64,
    /// Runs of workers that already exited, kept for the run context.
    exited_runs: BTreeMap<u64, BTreeMap<String, u64>>,
}

impl WorkerSet {
    pub(super) fn next_worker(&mut self) -> (u64, Arc<AtomicBool>, WorkerRuns) {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        (
            id,
            Arc::new(AtomicBool::new(false)),
            Arc::new(Mutex::new(BTreeMap::new())),
        )
    }

    pub(super) fn push(&mut self, handle: WorkerHandle) {
        self.live.push(handle);
    }

    pub(super) fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Signal the newest `count` live workers to finish and stop counting them.
    pub(super) fn retire(&mut self, count: usize) {
        let keep = self.live.len().saturating_sub(count);
        let retired = self.live.split_off(keep);
        for worker in &retired {
            worker.signal_finish();
        }
        self.retiring.extend(retired);
    }

    /// Forget workers whose tasks have exited.
    pub(super) fn reap(&mut self) {
        let mut exited = Vec::new();
        for set in [&mut self.live, &mut self.retiring] {
            let (done, running): (Vec<_>, Vec<_>) =
                set.drain(..).partition(WorkerHandle::has_exited);
            *set = running;
            exited.extend(done);
        }
        for worker in exited {
            let runs = worker.runs.lock().map(|runs| runs.clone()).unwrap_or_default();
            self.exited_runs.insert(worker.id, runs);
        }
    }

    /// Post-resize invariant: exactly `expected` live workers, none of them
    /// already told to finish.
    pub(super) fn verify(&self, expected: usize) -> Result<(), RunModeError> {
        if self.live.len() != expected {
            return Err(RunModeError::WorkerCountMismatch {
                expected,
                actual: self.live.len(),
            });
        }
        if let Some(worker) = self.live.iter().find(|worker| worker.is_signalled()) {
            return Err(RunModeError::RetiredWorkerCounted { worker: worker.id });
        }
        Ok(())
    }

    pub(super) fn signal_all(&self) {
        for worker in self.live.iter().chain(self.retiring.iter()) {
            worker.signal_finish();
        }
    }

    pub(super) fn all_exited(&self) -> bool {
        self.live
            .iter()
            .chain(self.retiring.iter())
            .all(WorkerHandle::has_exited)
    }

    /// Abort every worker still running; returns how many were aborted.
    pub(super) fn abort_running(&mut self) -> usize {
        let mut aborted = 0usize;
        for worker in self.live.iter().chain(self.retiring.iter()) {
            if !worker.has_exited() {
                worker.task.abort();
                aborted = aborted.saturating_add(1);
            }
        }
        aborted
    }

    pub(super) fn snapshot(&self, finished: bool) -> RunContext {
        let mut runs = self.exited_runs.clone();
        for worker in self.live.iter().chain(self.retiring.iter()) {
            let worker_runs = worker.runs.lock().map(|runs| runs.clone()).unwrap_or_default();
            runs.insert(worker.id, worker_runs);
        }
        RunContext {
            workers: self.live.len(),
            retiring: self.retiring.len(),
            runs,
            finished,
        }
    }
}

/// Point-in-time view of an engine for monitoring and balancing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunContext {
    pub workers: usize,
    pub retiring: usize,
    /// Executions per test, keyed by worker id.
    pub runs: BTreeMap<u64, BTreeMap<String, u64>>,
    pub finished: bool,
}

impl RunContext {
    #[must_use]
    pub fn total_runs(&self) -> u64 {
        self.runs
            .values()
            .flat_map(BTreeMap::values)
            .fold(0u64, |acc, value| acc.saturating_add(*value))
    }
}
