use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::error::{AppResult, DistributedError};
use crate::metrics::TestSummary;
use crate::phase::{Phase, distribute_for_rebalance};

use super::super::monitor::DistributedPhaseMonitor;
use super::super::protocol::{ExecutionSnapshot, HeartbeatReport, PhaseFinishedReport};

/// Master-side progress of the running execution plan.
#[derive(Default)]
pub(crate) struct ExecutionTracker {
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    plan: Option<Vec<Phase>>,
    current: usize,
    monitor: Option<DistributedPhaseMonitor>,
    finished: BTreeSet<String>,
    summaries: BTreeMap<String, Vec<TestSummary>>,
    last_epoch: u64,
    completed_plans: u64,
}

/// One redistribution: the outstanding work and how it was handed out.
pub(crate) struct Redistribution {
    pub(crate) phase: Phase,
    pub(crate) members: Vec<String>,
    pub(crate) parts: BTreeMap<String, Phase>,
    pub(crate) epoch: u64,
}

/// What a finished phase leaves behind for reporting.
pub(crate) struct PhaseOutcome {
    pub(crate) phase: String,
    pub(crate) agents: Vec<String>,
    pub(crate) completed: BTreeMap<String, u64>,
    pub(crate) summaries: Vec<TestSummary>,
}

impl ExecutionTracker {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn start_plan(&self, phases: Vec<Phase>) -> Result<(), DistributedError> {
        let mut state = self.lock();
        if state.plan.is_some() {
            return Err(DistributedError::ExecutionInProgress);
        }
        state.plan = Some(phases);
        state.current = 0;
        Ok(())
    }

    pub(crate) fn finish_plan(&self) {
        let mut state = self.lock();
        state.plan = None;
        state.monitor = None;
        state.current = 0;
        state.finished.clear();
        state.summaries.clear();
        state.completed_plans = state.completed_plans.saturating_add(1);
    }

    /// Forget the plan without counting it, e.g. after stepping down.
    pub(crate) fn abandon(&self) {
        let mut state = self.lock();
        state.plan = None;
        state.monitor = None;
        state.finished.clear();
        state.summaries.clear();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().plan.is_some()
    }

    pub(crate) fn is_executing_phase(&self) -> bool {
        self.lock().monitor.is_some()
    }

    pub(crate) fn completed_plans(&self) -> u64 {
        self.lock().completed_plans
    }

    pub(crate) fn is_active(&self, agent: &str) -> bool {
        self.lock()
            .monitor
            .as_ref()
            .is_some_and(|monitor| monitor.is_active(agent))
    }

    pub(crate) fn active_agents(&self) -> Vec<String> {
        self.lock()
            .monitor
            .as_ref()
            .map(|monitor| monitor.active_agents().to_vec())
            .unwrap_or_default()
    }

    /// Start tracking phase `index` on `agents`; returns the phase's epoch.
    pub(crate) fn begin_phase(&self, index: usize, phase: &Phase, agents: &[String], now_ms: u64) -> u64 {
        let mut state = self.lock();
        state.last_epoch = state.last_epoch.saturating_add(1);
        let epoch = state.last_epoch;
        state.current = index;
        state.monitor = Some(DistributedPhaseMonitor::new(phase, agents, epoch, now_ms));
        state.finished.clear();
        state.summaries.clear();
        epoch
    }

    pub(crate) fn record_heartbeat(&self, report: &HeartbeatReport) {
        let mut state = self.lock();
        let TrackerState {
            monitor, finished, ..
        } = &mut *state;
        let Some(monitor) = monitor.as_mut() else {
            return;
        };
        if report.phase.as_deref() != Some(monitor.phase_name()) {
            return;
        }
        if monitor.record(&report.agent, report.epoch, &report.completed) && report.finished {
            finished.insert(report.agent.clone());
        }
    }

    pub(crate) fn record_finished(&self, report: PhaseFinishedReport) {
        let mut state = self.lock();
        let TrackerState {
            monitor,
            finished,
            summaries,
            ..
        } = &mut *state;
        let Some(monitor) = monitor.as_mut() else {
            return;
        };
        if report.phase != monitor.phase_name() {
            return;
        }
        // Summaries cover the agent's whole task, so even a stale report
        // carries the freshest numbers.
        summaries.insert(report.agent.clone(), report.summaries);
        if monitor.record(&report.agent, report.epoch, &report.completed) {
            finished.insert(report.agent);
        } else {
            debug!(
                "Ignoring finish report of {} for epoch {} (current {})",
                report.agent,
                report.epoch,
                monitor.epoch()
            );
        }
    }

    pub(crate) fn remove_agents(&self, agents: &[String]) {
        let mut state = self.lock();
        for agent in agents {
            if let Some(monitor) = state.monitor.as_mut() {
                monitor.remove_agent(agent);
            }
            state.finished.remove(agent);
        }
    }

    /// Split the work outstanding right now over the active agents plus
    /// `joining`, and start the next epoch on exactly the split counts.
    /// Returns `None` when no phase is executing.
    pub(crate) fn redistribute(
        &self,
        joining: &[String],
        now_ms: u64,
    ) -> AppResult<Option<Redistribution>> {
        let mut state = self.lock();
        let TrackerState {
            plan,
            current,
            monitor,
            finished,
            last_epoch,
            ..
        } = &mut *state;
        let (Some(monitor), Some(template)) = (
            monitor.as_mut(),
            plan.as_ref().and_then(|phases| phases.get(*current)),
        ) else {
            return Ok(None);
        };

        let phase = template.with_counts(&monitor.remaining());
        let existing = monitor.active_agents().to_vec();
        let elapsed = Duration::from_millis(now_ms.saturating_sub(monitor.phase_start_ms()));
        let parts = distribute_for_rebalance(&phase, &existing, joining, elapsed)?;

        *last_epoch = last_epoch.saturating_add(1);
        let epoch = *last_epoch;
        let mut members = existing;
        members.extend(joining.iter().cloned());
        monitor.reset(members.clone(), epoch, phase.counts());
        finished.clear();
        Ok(Some(Redistribution {
            phase,
            members,
            parts,
            epoch,
        }))
    }

    /// Every active agent has finished the current epoch, or every agent is
    /// gone and nothing remains.
    pub(crate) fn phase_complete(&self) -> bool {
        let state = self.lock();
        let Some(monitor) = state.monitor.as_ref() else {
            return false;
        };
        let active = monitor.active_agents();
        if active.is_empty() {
            return monitor.remaining_total() == 0;
        }
        active.iter().all(|agent| state.finished.contains(agent))
    }

    /// Every active agent has delivered its phase summaries.
    pub(crate) fn summaries_complete(&self) -> bool {
        let state = self.lock();
        state.monitor.as_ref().is_none_or(|monitor| {
            monitor
                .active_agents()
                .iter()
                .all(|agent| state.summaries.contains_key(agent))
        })
    }

    pub(crate) fn remaining_total(&self) -> u64 {
        self.lock()
            .monitor
            .as_ref()
            .map_or(0, DistributedPhaseMonitor::remaining_total)
    }

    pub(crate) fn end_phase(&self) -> Option<PhaseOutcome> {
        let mut state = self.lock();
        let monitor = state.monitor.take()?;
        state.finished.clear();
        let summaries = std::mem::take(&mut state.summaries)
            .into_values()
            .flatten()
            .collect();
        Some(PhaseOutcome {
            phase: monitor.phase_name().to_owned(),
            agents: monitor.active_agents().to_vec(),
            completed: monitor.phase_completed(),
            summaries,
        })
    }

    pub(crate) fn snapshot(&self) -> Option<ExecutionSnapshot> {
        let state = self.lock();
        let plan = state.plan.as_ref()?;
        Some(ExecutionSnapshot {
            plan: plan.clone(),
            current: state.current,
            monitor: state.monitor.as_ref().map(DistributedPhaseMonitor::snapshot),
            finished_agents: state.finished.clone(),
            summaries: state.summaries.clone(),
        })
    }

    /// Adopt a mirrored execution; the caller resumes the plan.
    pub(crate) fn restore(&self, execution: &ExecutionSnapshot) {
        let mut state = self.lock();
        state.plan = Some(execution.plan.clone());
        state.current = execution.current;
        state.monitor = execution
            .monitor
            .clone()
            .map(DistributedPhaseMonitor::from_snapshot);
        if let Some(monitor) = state.monitor.as_ref() {
            state.last_epoch = state.last_epoch.max(monitor.epoch());
        }
        state.finished = execution.finished_agents.clone();
        state.summaries = execution.summaries.clone();
    }
}
