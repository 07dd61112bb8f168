//! The redistribution run by the Task Balancer on the master.
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::error::DistributedError;
use crate::phase::Phase;
use crate::runmode::RunModeChanges;

use super::super::agent::AgentStatus;
use super::super::http::ClusterClient;
use super::super::protocol::{Ack, RedistributionInstructions, StatusReport, TaskPayload, paths};
use super::super::utils::current_time_ms;
use super::DriverNode;
use super::balancer::{RebalanceOutcome, RebalanceWork};
use super::tracker::Redistribution;

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(super) struct DriverRebalancer {
    driver: Weak<DriverNode>,
}

impl DriverRebalancer {
    pub(super) const fn new(driver: Weak<DriverNode>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl RebalanceWork for DriverRebalancer {
    async fn rebalance_work(&self, new: Vec<String>, dead: Vec<String>) -> RebalanceOutcome {
        match self.driver.upgrade() {
            Some(driver) => redistribute(&driver, new, &dead).await,
            None => RebalanceOutcome::default(),
        }
    }
}

async fn redistribute(driver: &Arc<DriverNode>, new: Vec<String>, dead: &[String]) -> RebalanceOutcome {
    driver.agents.remove_all(dead);
    driver.tracker.remove_agents(dead);
    for agent in dead {
        info!("Agent {} left; its completed work stays accounted", agent);
    }

    let mut joining: Vec<String> = Vec::new();
    for agent in new {
        if dead.contains(&agent)
            || joining.contains(&agent)
            || !driver.agents.contains(&agent)
            || driver.tracker.is_active(&agent)
        {
            continue;
        }
        joining.push(agent);
    }

    if !driver.tracker.is_executing_phase() {
        return RebalanceOutcome::default();
    }

    let (ready, timed_out) = readiness_barrier(driver, joining).await;
    if !timed_out.is_empty() {
        warn!(
            "Agent(s) {:?} did not become ready within {:?}; dropping them",
            timed_out, driver.settings.readiness_timeout
        );
        driver.agents.remove_all(&timed_out);
    }
    if driver.tracker.active_agents().is_empty() && ready.is_empty() {
        warn!(
            "No agent left for the running phase; {} executions are pending",
            driver.tracker.remaining_total()
        );
        return RebalanceOutcome::default();
    }

    // Outstanding work is read after the barrier, in the same step that
    // starts the new epoch.
    let Redistribution {
        phase,
        members,
        parts,
        epoch,
    } = match driver.tracker.redistribute(&ready, current_time_ms()) {
        Ok(Some(redistribution)) => redistribution,
        Ok(None) => return RebalanceOutcome::default(),
        Err(err) => {
            error!("Cannot redistribute the running phase: {}", err);
            return RebalanceOutcome::default();
        }
    };
    info!(
        "Redistributed {} executions of phase '{}' over {} agent(s) (epoch {})",
        phase.total_count(),
        phase.name,
        members.len(),
        epoch
    );

    let deliveries = parts.into_iter().map(|(agent, part)| {
        let client = driver.client.clone();
        let joining = ready.contains(&agent);
        async move {
            let result = if joining {
                deliver_task(&client, &agent, part, epoch).await
            } else {
                deliver_instructions(&client, &agent, &part, epoch).await
            };
            (agent, result)
        }
    });

    let mut failed = Vec::new();
    for (agent, result) in join_all(deliveries).await {
        if let Err(err) = result {
            warn!("Redistribution to {} failed: {}", agent, err);
            failed.push(agent);
        }
    }
    RebalanceOutcome { failed }
}

async fn deliver_task(
    client: &ClusterClient,
    agent: &str,
    phase: Phase,
    epoch: u64,
) -> Result<(), DistributedError> {
    let payload = TaskPayload { phase, epoch };
    client
        .post_json::<_, Ack>(agent, paths::SUBMIT_TASK, &payload)
        .await
        .map(|_| ())
}

async fn deliver_instructions(
    client: &ClusterClient,
    agent: &str,
    phase: &Phase,
    epoch: u64,
) -> Result<(), DistributedError> {
    let instructions = RedistributionInstructions {
        epoch,
        test_counts: phase.counts(),
        run_mode_properties: RunModeChanges::describe(&phase.run_mode),
    };
    client
        .post_json::<_, Ack>(agent, paths::REBALANCE, &instructions)
        .await
        .map(|_| ())
}

/// Wait until each joining agent reports `Running`, bounded by the readiness
/// timeout. Returns `(ready, timed_out)`.
async fn readiness_barrier(driver: &DriverNode, joining: Vec<String>) -> (Vec<String>, Vec<String>) {
    let timeout = driver.settings.readiness_timeout;
    let checks = joining.into_iter().map(|agent| {
        let client = driver.client.clone();
        async move {
            let ready = tokio::time::timeout(timeout, async {
                loop {
                    if let Ok(report) = client.get_json::<StatusReport>(&agent, paths::STATUS).await
                        && report.status == AgentStatus::Running
                    {
                        return;
                    }
                    tokio::time::sleep(READINESS_POLL_INTERVAL).await;
                }
            })
            .await
            .is_ok();
            (agent, ready)
        }
    });
    let mut ready = Vec::new();
    let mut timed_out = Vec::new();
    for (agent, is_ready) in join_all(checks).await {
        if is_ready {
            ready.push(agent);
        } else {
            timed_out.push(agent);
        }
    }
    (ready, timed_out)
}
