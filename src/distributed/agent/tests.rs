use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::DistributedSettings;
use crate::error::{AppError, AppResult, DistributedError, RunModeError};
use crate::metrics::{ResultSink, TestOutcome};
use crate::phase::{Phase, TestDefinition};
use crate::runmode::{NormalMode, RunMode, RunModeChanges};
use crate::runner::{ContentPool, TestRunner};
use crate::shutdown::{ShutdownSender, shutdown_channel};

use super::super::http::{HttpError, HttpRequest, HttpResponse, RouteHandler, bind_listener, serve};
use super::super::protocol::{
    Ack, PhaseFinishedReport, RedistributionInstructions, TaskPayload, paths,
};
use super::{AgentNode, AgentStatus};

struct InstantRunner;

#[async_trait]
impl TestRunner for InstantRunner {
    async fn run_test(&self, test: &TestDefinition, sink: &ResultSink) {
        tokio::task::yield_now().await;
        let _recorded = sink.record(test, TestOutcome::success(Duration::from_millis(1)));
    }
}

/// Driver stand-in that records finish reports.
#[derive(Default)]
struct StubDriver {
    reports: Mutex<Vec<PhaseFinishedReport>>,
}

impl StubDriver {
    fn reports(&self) -> Vec<PhaseFinishedReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RouteHandler for StubDriver {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        match request.path.as_str() {
            paths::PHASE_FINISHED => {
                let report: PhaseFinishedReport = request.json()?;
                if let Ok(mut reports) = self.reports.lock() {
                    reports.push(report);
                }
                HttpResponse::ok(&Ack::ok())
            }
            _ => HttpResponse::ok(&Ack::ok()),
        }
    }
}

struct Harness {
    agent: Arc<AgentNode>,
    driver: Arc<StubDriver>,
    shutdown_tx: ShutdownSender,
}

async fn harness() -> AppResult<Harness> {
    let listener = bind_listener("127.0.0.1:0").await?;
    let driver_addr = listener.local_addr()?.to_string();
    let driver = Arc::new(StubDriver::default());
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(serve(listener, driver.clone(), shutdown_rx));

    let settings = DistributedSettings {
        drivers: vec![driver_addr],
        heartbeat_interval: Duration::from_millis(100),
        retry_attempts: 1,
        shutdown_grace: Duration::from_millis(200),
        ..DistributedSettings::default()
    };
    let agent = AgentNode::new(
        "agent-under-test".to_owned(),
        settings,
        16,
        Arc::new(InstantRunner),
        Arc::new(ContentPool::new(16)),
    )?;
    Ok(Harness {
        agent,
        driver,
        shutdown_tx,
    })
}

fn mode() -> RunMode {
    RunMode::Normal(NormalMode {
        concurrency: 3,
        wait_time_ms: 0,
        ramp: None,
    })
}

fn payload(count: u64, epoch: u64) -> TaskPayload {
    TaskPayload {
        phase: Phase {
            name: "warmup".to_owned(),
            tests: vec![TestDefinition {
                name: "get".to_owned(),
                count,
                measurable: true,
                records_content: false,
                request: None,
            }],
            run_mode: mode(),
        },
        epoch,
    }
}

async fn wait_for_report(driver: &StubDriver, epoch: u64) -> AppResult<PhaseFinishedReport> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(report) = driver
                .reports()
                .into_iter()
                .find(|report| report.epoch == epoch)
            {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(|_| AppError::distributed("No finish report arrived"))
}

fn total(counts: &BTreeMap<String, u64>) -> u64 {
    counts.values().sum()
}

#[tokio::test]
async fn task_runs_to_completion_and_reports() -> AppResult<()> {
    let harness = harness().await?;
    harness.agent.submit_task(payload(30, 1)).await?;

    let report = wait_for_report(&harness.driver, 1).await?;
    if total(&report.completed) != 30 || report.phase != "warmup" {
        return Err(AppError::distributed(DistributedError::TestExpectationValue {
            message: "Unexpected finish report",
            value: format!("{:?}", report.completed),
        }));
    }
    if report.summaries.first().map(|summary| summary.executions) != Some(30) {
        return Err(AppError::distributed("Summary should cover every execution"));
    }
    let heartbeat = harness.agent.heartbeat();
    if !heartbeat.finished || heartbeat.epoch != 1 || total(&heartbeat.completed) != 30 {
        return Err(AppError::distributed("Heartbeat should show the finished epoch"));
    }

    harness.agent.finish_task().await;
    if harness.agent.heartbeat().phase.is_some() {
        return Err(AppError::distributed("Finished task should be dropped"));
    }
    let _stopped = harness.shutdown_tx.send(());
    Ok(())
}

#[tokio::test]
async fn redistribution_restarts_a_finished_engine() -> AppResult<()> {
    let harness = harness().await?;
    harness.agent.submit_task(payload(10, 1)).await?;
    wait_for_report(&harness.driver, 1).await?;

    let instructions = RedistributionInstructions {
        epoch: 2,
        test_counts: BTreeMap::from([("get".to_owned(), 7)]),
        run_mode_properties: RunModeChanges::describe(&mode()),
    };
    harness.agent.rebalance(&instructions)?;

    let report = wait_for_report(&harness.driver, 2).await?;
    if total(&report.completed) != 7 {
        return Err(AppError::distributed(DistributedError::TestExpectationValue {
            message: "Restarted engine should run the new share only",
            value: format!("{:?}", report.completed),
        }));
    }

    // Replayed instructions are ignored.
    let stale = RedistributionInstructions {
        epoch: 2,
        test_counts: BTreeMap::from([("get".to_owned(), 50)]),
        run_mode_properties: BTreeMap::new(),
    };
    harness.agent.rebalance(&stale)?;
    if harness.agent.heartbeat().epoch != 2 {
        return Err(AppError::distributed("Stale instructions must not change the epoch"));
    }
    harness.agent.finish_task().await;
    let _stopped = harness.shutdown_tx.send(());
    Ok(())
}

#[tokio::test]
async fn malformed_redistribution_is_rejected_before_mutation() -> AppResult<()> {
    let harness = harness().await?;
    let unknown = RedistributionInstructions {
        epoch: 5,
        test_counts: BTreeMap::from([("missing".to_owned(), 3)]),
        run_mode_properties: BTreeMap::new(),
    };
    if !matches!(
        harness.agent.rebalance(&unknown),
        Err(AppError::Distributed(DistributedError::NoTask))
    ) {
        return Err(AppError::distributed("Rebalance without a task must fail"));
    }

    harness.agent.submit_task(payload(1000, 1)).await?;
    if !matches!(
        harness.agent.rebalance(&unknown),
        Err(AppError::RunMode(RunModeError::UnknownTest { .. }))
    ) {
        return Err(AppError::distributed("Unknown test must be rejected"));
    }
    let bad_property = RedistributionInstructions {
        epoch: 5,
        test_counts: BTreeMap::new(),
        run_mode_properties: BTreeMap::from([("load".to_owned(), "3".to_owned())]),
    };
    if harness.agent.rebalance(&bad_property).is_ok() {
        return Err(AppError::distributed("Foreign run mode property must be rejected"));
    }
    if harness.agent.heartbeat().epoch != 1 {
        return Err(AppError::distributed("Rejected instructions must not apply"));
    }
    harness.agent.finish_task().await;
    let _stopped = harness.shutdown_tx.send(());
    Ok(())
}

#[tokio::test]
async fn status_reflects_lifecycle() -> AppResult<()> {
    let harness = harness().await?;
    if harness.agent.status_report().status != AgentStatus::Idle {
        return Err(AppError::distributed("New agent should be idle"));
    }
    let listener = bind_listener("127.0.0.1:0").await?;
    let (agent_shutdown_tx, agent_shutdown_rx) = shutdown_channel();
    let running = tokio::spawn(harness.agent.clone().run(listener, agent_shutdown_rx));

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.agent.status_report().status != AgentStatus::Running {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(|_| AppError::distributed("Agent never reached Running"))?;

    let _stopped = agent_shutdown_tx.send(());
    running.await?;
    let _stopped = harness.shutdown_tx.send(());
    Ok(())
}
