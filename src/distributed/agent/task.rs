use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, RunModeError};
use crate::metrics::ResultSink;
use crate::phase::TestSuite;
use crate::runmode::{RunContext, RunModeChanges, RunModeEngine};

use super::super::protocol::{
    Ack, ContentAck, HeartbeatReport, PhaseFinishedReport, RedistributionInstructions,
    TaskPayload, paths,
};
use super::AgentNode;

/// The phase share an agent is currently executing.
pub(super) struct ActiveTask {
    phase: String,
    engine: RunModeEngine,
    /// Epoch of the baseline the suite's completed counts refer to.
    epoch: watch::Sender<u64>,
    closed: AtomicBool,
}

impl ActiveTask {
    pub(super) fn start(agent: &AgentNode, payload: TaskPayload) -> AppResult<Arc<Self>> {
        let TaskPayload { phase, epoch } = payload;
        let suite = Arc::new(TestSuite::new(&phase.tests));
        let sink = Arc::new(ResultSink::new(agent.content_capacity));
        let engine = RunModeEngine::new(
            phase.run_mode.clone(),
            suite,
            agent.runner.clone(),
            sink,
            agent.shutdown_grace(),
        );
        engine.start()?;
        info!(
            "Phase '{}' started with {} executions (epoch {})",
            phase.name,
            phase.total_count(),
            epoch
        );
        let (epoch, _) = watch::channel(epoch);
        Ok(Arc::new(Self {
            phase: phase.name,
            engine,
            epoch,
            closed: AtomicBool::new(false),
        }))
    }

    pub(super) fn phase(&self) -> &str {
        &self.phase
    }

    fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(super) fn context(&self) -> Option<RunContext> {
        self.engine.context()
    }

    pub(super) fn heartbeat(&self, agent: &str) -> HeartbeatReport {
        HeartbeatReport {
            agent: agent.to_owned(),
            phase: Some(self.phase.clone()),
            epoch: self.epoch(),
            completed: self.engine.suite().completed_snapshot(),
            finished: self.engine.is_finished(),
        }
    }

    /// Adopt a new share of the phase. Instructions for an epoch not newer
    /// than the current one are ignored.
    pub(super) fn rebalance(&self, instructions: &RedistributionInstructions) -> AppResult<()> {
        let current = self.epoch();
        if instructions.epoch <= current {
            info!(
                "Ignoring redistribution for epoch {} (current {})",
                instructions.epoch, current
            );
            return Ok(());
        }
        let mode = self
            .engine
            .mode()
            .ok_or_else(|| AppError::run_mode(RunModeError::StatePoisoned))?;
        let changes = RunModeChanges::parse(&mode, &instructions.run_mode_properties)?;
        let suite = self.engine.suite();
        if let Some(test) = instructions
            .test_counts
            .keys()
            .find(|test| !suite.contains(test))
        {
            return Err(AppError::run_mode(RunModeError::UnknownTest { test: test.clone() }));
        }

        let unclaimed = total_remaining(suite);
        for (test, remaining) in &instructions.test_counts {
            suite.set_remaining(test, *remaining);
        }
        suite.reset_completed();
        self.engine.rebalance(&changes)?;
        let restarted = self.engine.restart_if_idle()?;
        self.epoch.send_replace(instructions.epoch);
        info!(
            "Redistribution applied for phase '{}' (epoch {}, {} -> {} unclaimed{})",
            self.phase,
            instructions.epoch,
            unclaimed,
            total_remaining(suite),
            if restarted { ", engine restarted" } else { "" }
        );
        Ok(())
    }

    pub(super) async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.epoch.send_modify(|_| {});
        self.engine.shutdown().await;
    }
}

/// Report every epoch's completion to the drivers until the task closes.
pub(super) async fn report_loop(agent: Arc<AgentNode>, task: Arc<ActiveTask>) {
    loop {
        task.engine.wait_finished().await;
        if task.is_closed() {
            return;
        }
        let epoch = task.epoch();
        // A redistribution may have restarted the engine in between.
        if !task.engine.is_finished() {
            continue;
        }
        report_finished(&agent, &task, epoch).await;

        let mut epochs = task.epoch.subscribe();
        loop {
            if task.is_closed() {
                return;
            }
            if *epochs.borrow_and_update() != epoch {
                break;
            }
            if epochs.changed().await.is_err() {
                return;
            }
        }
    }
}

async fn report_finished(agent: &AgentNode, task: &ActiveTask, epoch: u64) {
    let sink = task.engine.sink();
    let items = sink.take_content();
    if !items.is_empty() {
        agent.content.extend(items.iter().cloned());
        let ack = ContentAck {
            agent: agent.id.clone(),
            items,
        };
        if let Err(err) = agent
            .post_to_drivers::<_, Ack>(paths::CONTENT_ACK, &ack)
            .await
        {
            warn!("Content acknowledgement for phase '{}' lost: {}", task.phase, err);
        }
    }

    let summaries = sink.summaries().unwrap_or_else(|err| {
        warn!("Cannot summarize phase '{}': {}", task.phase, err);
        Vec::new()
    });
    let completed = task.engine.suite().completed_snapshot();
    let executions = completed
        .values()
        .fold(0u64, |acc, count| acc.saturating_add(*count));
    let report = PhaseFinishedReport {
        agent: agent.id.clone(),
        phase: task.phase.clone(),
        epoch,
        completed,
        summaries,
    };
    match agent
        .post_to_drivers::<_, Ack>(paths::PHASE_FINISHED, &report)
        .await
    {
        Ok(_) => info!(
            "Phase '{}' finished locally with {} executions (epoch {})",
            task.phase, executions, epoch
        ),
        Err(err) => warn!("Finish report for phase '{}' lost: {}", task.phase, err),
    }
}

fn total_remaining(suite: &TestSuite) -> u64 {
    suite
        .remaining_snapshot()
        .values()
        .fold(0u64, |acc, count| acc.saturating_add(*count))
}
