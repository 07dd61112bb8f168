//! Master-side accounting of how much of the executing phase is done.
//!
//! Counts are tracked per test and per agent relative to a baseline: the
//! remaining executions at the start of the current epoch. Every rebalance
//! starts a new epoch with the redistributed work as its baseline, so agents that
//! restart their own counters never cause double counting.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub phase: String,
    pub epoch: u64,
    pub phase_start_ms: u64,
    pub totals: BTreeMap<String, u64>,
    pub baseline: BTreeMap<String, u64>,
    /// test -> agent -> completed since the baseline.
    pub executions: BTreeMap<String, BTreeMap<String, u64>>,
    /// Work completed this epoch by agents that have since left.
    pub retired: BTreeMap<String, u64>,
    pub active_agents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedPhaseMonitor {
    state: MonitorSnapshot,
}

impl DistributedPhaseMonitor {
    #[must_use]
    pub fn new(phase: &Phase, agents: &[String], epoch: u64, phase_start_ms: u64) -> Self {
        let totals = phase.counts();
        Self {
            state: MonitorSnapshot {
                phase: phase.name.clone(),
                epoch,
                phase_start_ms,
                baseline: totals.clone(),
                totals,
                executions: BTreeMap::new(),
                retired: BTreeMap::new(),
                active_agents: agents.to_vec(),
            },
        }
    }

    #[must_use]
    pub const fn from_snapshot(snapshot: MonitorSnapshot) -> Self {
        Self { state: snapshot }
    }

    #[must_use]
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.state.clone()
    }

    #[must_use]
    pub fn phase_name(&self) -> &str {
        &self.state.phase
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.state.epoch
    }

    #[must_use]
    pub const fn phase_start_ms(&self) -> u64 {
        self.state.phase_start_ms
    }

    #[must_use]
    pub fn active_agents(&self) -> &[String] {
        &self.state.active_agents
    }

    #[must_use]
    pub fn is_active(&self, agent: &str) -> bool {
        self.state.active_agents.iter().any(|known| known == agent)
    }

    /// Overwrite an agent's counts for the current epoch.
    ///
    /// Reports from an older epoch or from an agent outside the active set are
    /// ignored and `false` is returned.
    pub fn record(&mut self, agent: &str, epoch: u64, completed: &BTreeMap<String, u64>) -> bool {
        if epoch != self.state.epoch || !self.is_active(agent) {
            return false;
        }
        for (test, count) in completed {
            if !self.state.baseline.contains_key(test) {
                continue;
            }
            self.state
                .executions
                .entry(test.clone())
                .or_default()
                .insert(agent.to_owned(), *count);
        }
        true
    }

    /// Drop an agent; what it completed this epoch still counts.
    pub fn remove_agent(&mut self, agent: &str) -> bool {
        let before = self.state.active_agents.len();
        self.state.active_agents.retain(|known| known != agent);
        if self.state.active_agents.len() == before {
            return false;
        }
        for (test, per_agent) in &mut self.state.executions {
            if let Some(count) = per_agent.remove(agent) {
                let retired = self.state.retired.entry(test.clone()).or_insert(0);
                *retired = retired.saturating_add(count);
            }
        }
        true
    }

    /// Completed executions per test this epoch, across active agents.
    #[must_use]
    pub fn executions_per_test(&self) -> BTreeMap<String, u64> {
        self.state
            .baseline
            .keys()
            .map(|test| {
                let count = self
                    .state
                    .executions
                    .get(test)
                    .map_or(0, |per_agent| {
                        per_agent
                            .values()
                            .fold(0u64, |acc, value| acc.saturating_add(*value))
                    });
                (test.clone(), count)
            })
            .collect()
    }

    /// Completed executions per test this epoch, including departed agents.
    #[must_use]
    pub fn completed_per_test(&self) -> BTreeMap<String, u64> {
        let mut completed = self.executions_per_test();
        for (test, count) in &mut completed {
            let retired = self.state.retired.get(test).copied().unwrap_or(0);
            *count = count.saturating_add(retired);
        }
        completed
    }

    /// Executions per test still owed for the phase.
    #[must_use]
    pub fn remaining(&self) -> BTreeMap<String, u64> {
        let completed = self.completed_per_test();
        self.state
            .baseline
            .iter()
            .map(|(test, baseline)| {
                let done = completed.get(test).copied().unwrap_or(0);
                (test.clone(), baseline.saturating_sub(done))
            })
            .collect()
    }

    #[must_use]
    pub fn remaining_total(&self) -> u64 {
        self.remaining()
            .values()
            .fold(0u64, |acc, value| acc.saturating_add(*value))
    }

    /// Executions per test completed since the phase started.
    #[must_use]
    pub fn phase_completed(&self) -> BTreeMap<String, u64> {
        let remaining = self.remaining();
        self.state
            .totals
            .iter()
            .map(|(test, total)| {
                let left = remaining.get(test).copied().unwrap_or(0);
                (test.clone(), total.saturating_sub(left))
            })
            .collect()
    }

    /// Start a new epoch whose baseline is the work handed out to `agents`;
    /// all per-agent counts restart from zero.
    pub fn reset(&mut self, agents: Vec<String>, epoch: u64, baseline: BTreeMap<String, u64>) {
        self.state.baseline = baseline;
        self.state.executions.clear();
        self.state.retired.clear();
        self.state.active_agents = agents;
        self.state.epoch = epoch;
    }
}
