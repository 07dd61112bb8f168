//! Sequential execution of a submitted plan on the master.
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::error::{AppResult, DistributedError};
use crate::metrics::merge_summaries;
use crate::phase::{self, Phase};

use super::super::protocol::{Ack, ContentSample, TaskPayload, paths};
use super::super::utils::current_time_ms;
use super::{DriverNode, lock};

const PHASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Accept a new plan and run it in the background.
///
/// # Errors
///
/// Returns an error if a plan is already running.
pub(super) fn start_plan(driver: &Arc<DriverNode>, phases: Vec<Phase>) -> Result<(), DistributedError> {
    driver.tracker.start_plan(phases.clone())?;
    info!("Execution plan accepted with {} phase(s)", phases.len());
    spawn_plan(driver, phases, 0, false);
    Ok(())
}

/// Continue the plan mirrored from the previous master, if any.
pub(super) fn resume_from_shadow(driver: &Arc<DriverNode>) {
    let Some(snapshot) = driver.take_shadow() else {
        return;
    };
    for agent in &snapshot.agents {
        driver.agents.register(agent);
    }
    let Some(execution) = snapshot.execution else {
        return;
    };
    driver.tracker.restore(&execution);
    let resuming = execution.monitor.is_some();
    info!(
        "Resuming execution plan at phase {} of {}",
        execution.current.saturating_add(1),
        execution.plan.len()
    );
    if resuming {
        // Agents the old master had not placed yet.
        for agent in driver.agents.snapshot() {
            if !driver.tracker.is_active(&agent) {
                driver.balancer.agent_joined(&agent);
            }
        }
    }
    spawn_plan(driver, execution.plan, execution.current, resuming);
}

fn spawn_plan(driver: &Arc<DriverNode>, phases: Vec<Phase>, start: usize, resuming: bool) {
    let task = tokio::spawn(run_plan(driver.clone(), phases, start, resuming));
    if let Some(previous) = lock(&driver.plan_task).replace(task) {
        previous.abort();
    }
}

async fn run_plan(driver: Arc<DriverNode>, phases: Vec<Phase>, start: usize, mut resuming: bool) {
    for (index, phase) in phases.iter().enumerate().skip(start) {
        if resuming {
            resuming = false;
        } else if let Err(err) = start_phase(&driver, index, phase).await {
            error!("Aborting execution plan at phase '{}': {}", phase.name, err);
            driver.tracker.abandon();
            return;
        }
        wait_phase_complete(&driver).await;
        complete_phase(&driver).await;
    }
    driver.tracker.finish_plan();
    info!("Execution plan finished");
}

async fn start_phase(driver: &DriverNode, index: usize, phase: &Phase) -> AppResult<()> {
    let agents = wait_for_agents(driver, &phase.name).await;
    let parts = phase::distribute(phase, &agents)?;
    let epoch = driver
        .tracker
        .begin_phase(index, phase, &agents, current_time_ms());
    info!(
        "Phase '{}' started on {} agent(s) with {} executions",
        phase.name,
        agents.len(),
        phase.total_count()
    );

    let submissions = parts.into_iter().map(|(agent, part)| {
        let client = driver.client.clone();
        async move {
            let payload = TaskPayload { phase: part, epoch };
            let result = client
                .post_json::<_, Ack>(&agent, paths::SUBMIT_TASK, &payload)
                .await;
            (agent, result)
        }
    });
    for (agent, result) in join_all(submissions).await {
        if let Err(err) = result {
            warn!("Submitting phase '{}' to {} failed: {}", phase.name, agent, err);
            driver.balancer.agent_departed(&agent);
        }
    }
    Ok(())
}

async fn wait_for_agents(driver: &DriverNode, phase: &str) -> Vec<String> {
    let mut warned = false;
    loop {
        let agents = driver.agents.snapshot();
        if !agents.is_empty() {
            return agents;
        }
        if !warned {
            warn!("Phase '{}' is waiting for at least one agent", phase);
            warned = true;
        }
        tokio::time::sleep(driver.settings.heartbeat_interval).await;
    }
}

/// Waits for the phase to complete, then at most one heartbeat interval
/// for finish reports that a heartbeat overtook.
async fn wait_phase_complete(driver: &DriverNode) {
    let mut stalled = false;
    let mut completed_at: Option<Instant> = None;
    loop {
        if driver.tracker.phase_complete() && driver.balancer.is_idle() {
            if driver.tracker.summaries_complete() {
                return;
            }
            let since = *completed_at.get_or_insert_with(Instant::now);
            if since.elapsed() >= driver.settings.heartbeat_interval {
                debug!("Closing phase without summaries from every agent");
                return;
            }
        } else {
            completed_at = None;
        }
        let orphaned = driver.tracker.active_agents().is_empty() && driver.balancer.is_idle();
        if orphaned && !stalled {
            warn!(
                "No agent is executing the phase; {} executions wait for a new agent",
                driver.tracker.remaining_total()
            );
        }
        stalled = orphaned;
        tokio::time::sleep(PHASE_POLL_INTERVAL).await;
    }
}

async fn complete_phase(driver: &DriverNode) {
    let Some(outcome) = driver.tracker.end_phase() else {
        return;
    };
    driver.balancer.clear();

    let executions = outcome
        .completed
        .values()
        .fold(0u64, |acc, count| acc.saturating_add(*count));
    info!(
        "Phase '{}' finished: {} executions",
        outcome.phase, executions
    );
    match merge_summaries(&outcome.summaries) {
        Ok(reports) => {
            for report in reports {
                info!(
                    "  {}: {} executions, {} errors, p50={}ms p90={}ms p99={}ms",
                    report.test,
                    report.executions,
                    report.errors,
                    report.p50_ms,
                    report.p90_ms,
                    report.p99_ms
                );
            }
        }
        Err(err) => warn!("Cannot merge summaries of phase '{}': {}", outcome.phase, err),
    }

    let finishes = outcome.agents.iter().map(|agent| {
        let client = driver.client.clone();
        async move {
            if let Err(err) = client
                .post_json::<_, Ack>(agent, paths::FINISH, &Ack::ok())
                .await
            {
                warn!("Finishing phase on {} failed: {}", agent, err);
            }
        }
    });
    join_all(finishes).await;

    let items = driver.content.sample(driver.settings.content_sample_size);
    if items.is_empty() {
        return;
    }
    let sample = ContentSample { items };
    let agents = driver.agents.snapshot();
    let pushes = agents.iter().map(|agent| {
        let client = driver.client.clone();
        let sample = &sample;
        async move {
            if let Err(err) = client
                .post_json::<_, Ack>(agent, paths::SAMPLE_CONTENT, sample)
                .await
            {
                warn!("Content sample push to {} failed: {}", agent, err);
            }
        }
    });
    join_all(pushes).await;
}
