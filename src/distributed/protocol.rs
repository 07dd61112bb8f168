//! Wire types and endpoint paths shared by drivers and agents.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::metrics::TestSummary;
use crate::phase::Phase;
use crate::runmode::RunContext;

use super::agent::AgentStatus;
use super::driver::DriverRole;
use super::monitor::MonitorSnapshot;

pub(crate) mod paths {
    pub(crate) const HEALTH: &str = "/health";

    pub(crate) const SUBMIT_TASK: &str = "/submitTask";
    pub(crate) const REBALANCE: &str = "/rebalance";
    pub(crate) const SAMPLE_CONTENT: &str = "/sampleContent";
    pub(crate) const FINISH: &str = "/finish";
    pub(crate) const HEARTBEAT: &str = "/heartbeat";
    pub(crate) const STATUS: &str = "/status";

    pub(crate) const CONFIG: &str = "/config";
    pub(crate) const REGISTER_AGENT: &str = "/registerAgent";
    pub(crate) const PHASE_FINISHED: &str = "/phaseFinished";
    pub(crate) const CONTENT_ACK: &str = "/contentAck";
    pub(crate) const FORWARD_CONFIG: &str = "/forwardConfig";
    pub(crate) const FORWARD_REGISTER: &str = "/forwardRegister";
    pub(crate) const FORWARD_PHASE_FINISHED: &str = "/forwardPhaseFinished";
    pub(crate) const FORWARD_CONTENT_ACK: &str = "/forwardContentAck";
    pub(crate) const INVALIDATE_CANDIDATE: &str = "/invalidateCandidate";
    pub(crate) const MASTER_ELECTED: &str = "/masterElected";
    pub(crate) const UPDATES: &str = "/updates";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub status: String,
}

impl Ack {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_owned(),
        }
    }

    #[must_use]
    pub fn accepted() -> Self {
        Self {
            status: "accepted".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterAgentRequest {
    /// Address the drivers use to reach the agent; doubles as its id.
    pub agent: String,
}

/// Full assignment for an agent joining a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPayload {
    pub phase: Phase,
    pub epoch: u64,
}

/// Delta for an agent already executing a phase: its new per-test remaining
/// counts and run mode fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedistributionInstructions {
    pub epoch: u64,
    pub test_counts: BTreeMap<String, u64>,
    pub run_mode_properties: BTreeMap<String, String>,
}

/// Completed executions per test since the agent's last baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub agent: String,
    pub phase: Option<String>,
    pub epoch: u64,
    pub completed: BTreeMap<String, u64>,
    /// The agent's engine has no more work for this epoch.
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub status: AgentStatus,
    pub phase: Option<String>,
    pub context: Option<RunContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseFinishedReport {
    pub agent: String,
    pub phase: String,
    pub epoch: u64,
    pub completed: BTreeMap<String, u64>,
    pub summaries: Vec<TestSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentAck {
    pub agent: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentSample {
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateNotice {
    pub id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverHealth {
    pub id: usize,
    pub role: DriverRole,
    pub master: Option<usize>,
    pub agents: usize,
    pub executing: bool,
    pub completed_plans: u64,
}

/// Master state mirrored by every candidate through `/updates`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub master: usize,
    pub agents: Vec<String>,
    pub execution: Option<ExecutionSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSnapshot {
    pub plan: Vec<Phase>,
    pub current: usize,
    pub monitor: Option<MonitorSnapshot>,
    pub finished_agents: BTreeSet<String>,
    pub summaries: BTreeMap<String, Vec<TestSummary>>,
}
