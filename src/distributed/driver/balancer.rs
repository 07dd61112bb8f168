//! Debounced, single-flight redistribution of a phase's remaining work.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerStatus {
    Unnecessary,
    Scheduled,
    Executing,
    RescheduleRequired,
}

/// Agents whose instructions could not be delivered during a redistribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceOutcome {
    pub failed: Vec<String>,
}

/// The redistribution itself, run with the de-duplicated membership events
/// collected since the previous run.
#[async_trait]
pub trait RebalanceWork: Send + Sync + 'static {
    async fn rebalance_work(&self, new: Vec<String>, dead: Vec<String>) -> RebalanceOutcome;
}

#[derive(Clone)]
pub struct TaskBalancer {
    inner: Arc<BalancerInner>,
}

struct BalancerInner {
    wait: Duration,
    work: Arc<dyn RebalanceWork>,
    state: Mutex<BalancerState>,
}

struct BalancerState {
    status: BalancerStatus,
    pending_new: Vec<String>,
    pending_dead: Vec<String>,
    timer: Option<JoinHandle<()>>,
}

impl TaskBalancer {
    #[must_use]
    pub fn new(wait: Duration, work: Arc<dyn RebalanceWork>) -> Self {
        Self {
            inner: Arc::new(BalancerInner {
                wait,
                work,
                state: Mutex::new(BalancerState {
                    status: BalancerStatus::Unnecessary,
                    pending_new: Vec::new(),
                    pending_dead: Vec::new(),
                    timer: None,
                }),
            }),
        }
    }

    pub fn agent_joined(&self, agent: &str) {
        self.inner.enqueue(agent, false);
    }

    pub fn agent_departed(&self, agent: &str) {
        self.inner.enqueue(agent, true);
    }

    #[must_use]
    pub fn status(&self) -> BalancerStatus {
        self.inner.lock_state().status
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.status() == BalancerStatus::Unnecessary
    }

    /// Drop queued events and any armed timer; a running redistribution is
    /// left to finish.
    pub fn clear(&self) {
        let mut state = self.inner.lock_state();
        state.pending_new.clear();
        state.pending_dead.clear();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.status == BalancerStatus::Scheduled {
            state.status = BalancerStatus::Unnecessary;
        }
    }
}

impl BalancerInner {
    fn lock_state(&self) -> MutexGuard<'_, BalancerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, agent: &str, dead: bool) {
        let mut state = self.lock_state();
        let queue = if dead {
            &mut state.pending_dead
        } else {
            &mut state.pending_new
        };
        if !queue.iter().any(|known| known == agent) {
            queue.push(agent.to_owned());
        }
        match state.status {
            BalancerStatus::Unnecessary => {
                state.status = BalancerStatus::Scheduled;
                self.arm(&mut state);
            }
            BalancerStatus::Executing => {
                state.status = BalancerStatus::RescheduleRequired;
            }
            BalancerStatus::Scheduled | BalancerStatus::RescheduleRequired => {}
        }
    }

    fn arm(self: &Arc<Self>, state: &mut BalancerState) {
        debug!("Redistribution scheduled in {:?}", self.wait);
        let inner = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.wait).await;
            inner.run().await;
        }));
    }

    async fn run(self: Arc<Self>) {
        let (new, dead) = {
            let mut state = self.lock_state();
            if state.status != BalancerStatus::Scheduled {
                return;
            }
            state.status = BalancerStatus::Executing;
            state.timer = None;
            (
                std::mem::take(&mut state.pending_new),
                std::mem::take(&mut state.pending_dead),
            )
        };
        info!(
            "Redistributing work: {} new agent(s), {} departed agent(s)",
            new.len(),
            dead.len()
        );

        let outcome = self.work.rebalance_work(new, dead).await;

        let mut state = self.lock_state();
        for agent in outcome.failed {
            if !state.pending_dead.contains(&agent) {
                state.pending_dead.push(agent);
            }
        }
        let follow_up = state.status == BalancerStatus::RescheduleRequired
            || !state.pending_dead.is_empty()
            || !state.pending_new.is_empty();
        if follow_up {
            state.status = BalancerStatus::Scheduled;
            self.arm(&mut state);
        } else {
            state.status = BalancerStatus::Unnecessary;
        }
    }
}
