use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::DistributedError;

use super::super::protocol::{ClusterSnapshot, HeartbeatReport, paths};
use super::DriverNode;

/// Master: poll every registered agent for its completed counts.
pub(super) async fn agent_heartbeat_loop(driver: Arc<DriverNode>) {
    let mut ticker = tokio::time::interval(driver.settings.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        poll_agents(&driver).await;
    }
}

async fn poll_agents(driver: &DriverNode) {
    let agents = driver.agents.snapshot();
    let polls = agents.iter().map(|agent| {
        let client = driver.client.clone();
        async move {
            let result = client
                .get_json::<HeartbeatReport>(agent, paths::HEARTBEAT)
                .await;
            (agent, result)
        }
    });
    for (agent, result) in join_all(polls).await {
        match result {
            Ok(report) if report.agent == *agent => driver.tracker.record_heartbeat(&report),
            Ok(report) => {
                warn!(
                    "Agent at {} answered as {}; ignoring heartbeat",
                    agent, report.agent
                );
            }
            Err(err) => agent_unreachable(driver, agent, &err),
        }
    }
}

fn agent_unreachable(driver: &DriverNode, agent: &str, err: &DistributedError) {
    if driver.tracker.is_executing_phase() {
        warn!("Agent {} missed its heartbeat during a phase: {}", agent, err);
        driver.balancer.agent_departed(agent);
    } else {
        warn!("Agent {} missed its heartbeat; deregistering: {}", agent, err);
        driver.agents.remove_all(&[agent.to_owned()]);
    }
}

/// Candidate: mirror the master's state; elect when it stops answering.
pub(super) async fn master_ping_loop(driver: Arc<DriverNode>) {
    let mut ticker = tokio::time::interval(driver.settings.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some((master_id, addr)) = driver.master_address() else {
            continue;
        };
        match driver
            .client
            .get_json::<ClusterSnapshot>(&addr, paths::UPDATES)
            .await
        {
            Ok(snapshot) => driver.store_shadow(snapshot),
            Err(DistributedError::Rejected { status, message, .. }) => {
                // Alive but not (yet) acting as master.
                debug!("Driver {} declined /updates ({}): {}", master_id, status, message);
            }
            Err(err) => {
                warn!("Master {} is unreachable: {}", master_id, err);
                tokio::spawn(driver.clone().fail_over(master_id));
                return;
            }
        }
    }
}

/// True if the master dropped an agent or an agent's count went down since
/// `previous`, i.e. the master redistributed work.
#[must_use]
pub fn detect_upstream_rebalance(previous: &ClusterSnapshot, next: &ClusterSnapshot) -> bool {
    if previous
        .agents
        .iter()
        .any(|agent| !next.agents.contains(agent))
    {
        return true;
    }
    let (Some(before), Some(after)) = (
        previous
            .execution
            .as_ref()
            .and_then(|execution| execution.monitor.as_ref()),
        next.execution
            .as_ref()
            .and_then(|execution| execution.monitor.as_ref()),
    ) else {
        return false;
    };
    if before.phase != after.phase {
        return false;
    }
    before.executions.iter().any(|(test, per_agent)| {
        per_agent.iter().any(|(agent, count)| {
            let current = after
                .executions
                .get(test)
                .and_then(|counts| counts.get(agent))
                .copied()
                .unwrap_or(0);
            current < *count
        })
    })
}
