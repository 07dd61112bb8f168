use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{AppError, AppResult, DistributedError};
use crate::phase::{Phase, TestDefinition};
use crate::runmode::{NormalMode, RunMode};
use crate::shutdown::shutdown_channel;

use super::http::{
    ClusterClient, HttpError, HttpRequest, HttpResponse, RouteHandler, bind_listener, serve,
};
use super::monitor::DistributedPhaseMonitor;
use super::protocol::{Ack, RegisterAgentRequest};

fn phase(counts: &[(&str, u64)]) -> Phase {
    Phase {
        name: "load".to_owned(),
        tests: counts
            .iter()
            .map(|(name, count)| TestDefinition {
                name: (*name).to_owned(),
                count: *count,
                measurable: true,
                records_content: false,
                request: None,
            })
            .collect(),
        run_mode: RunMode::Normal(NormalMode {
            concurrency: 2,
            wait_time_ms: 0,
            ramp: None,
        }),
    }
}

fn counts(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
    entries
        .iter()
        .map(|(name, count)| ((*name).to_owned(), *count))
        .collect()
}

fn agents(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

#[test]
fn monitor_sums_executions_across_agents() -> AppResult<()> {
    let mut monitor = DistributedPhaseMonitor::new(&phase(&[("a", 100), ("b", 10)]), &agents(&["x", "y"]), 1, 0);
    monitor.record("x", 1, &counts(&[("a", 30), ("b", 2)]));
    monitor.record("y", 1, &counts(&[("a", 20)]));
    // A later heartbeat overwrites the earlier one.
    monitor.record("x", 1, &counts(&[("a", 35), ("b", 2)]));

    if monitor.executions_per_test() != counts(&[("a", 55), ("b", 2)]) {
        return Err(AppError::distributed(DistributedError::TestExpectationValue {
            message: "Unexpected executions",
            value: format!("{:?}", monitor.executions_per_test()),
        }));
    }
    if monitor.remaining() != counts(&[("a", 45), ("b", 8)]) {
        return Err(AppError::distributed("Unexpected remaining counts"));
    }
    Ok(())
}

#[test]
fn monitor_ignores_stale_epochs_and_unknown_agents() -> AppResult<()> {
    let mut monitor = DistributedPhaseMonitor::new(&phase(&[("a", 10)]), &agents(&["x"]), 3, 0);
    if monitor.record("x", 2, &counts(&[("a", 5)])) {
        return Err(AppError::distributed("Stale epoch must be ignored"));
    }
    if monitor.record("z", 3, &counts(&[("a", 5)])) {
        return Err(AppError::distributed("Inactive agent must be ignored"));
    }
    if monitor.remaining_total() != 10 {
        return Err(AppError::distributed("Ignored reports must not count"));
    }
    Ok(())
}

#[test]
fn removed_agent_work_stays_completed() -> AppResult<()> {
    let mut monitor = DistributedPhaseMonitor::new(&phase(&[("a", 100)]), &agents(&["x", "y"]), 1, 0);
    monitor.record("x", 1, &counts(&[("a", 40)]));
    monitor.record("y", 1, &counts(&[("a", 10)]));

    if !monitor.remove_agent("x") {
        return Err(AppError::distributed("Known agent should be removed"));
    }
    if monitor.remove_agent("x") {
        return Err(AppError::distributed("Second removal should be a no-op"));
    }
    if monitor.executions_per_test() != counts(&[("a", 10)]) {
        return Err(AppError::distributed("Removed agent must leave the per-agent sums"));
    }
    if monitor.remaining() != counts(&[("a", 50)]) {
        return Err(AppError::distributed("Departed work must not be re-issued"));
    }
    if monitor.active_agents() != agents(&["y"]).as_slice() {
        return Err(AppError::distributed("Removed agent is still active"));
    }
    Ok(())
}

#[test]
fn reset_rebases_on_remaining_work() -> AppResult<()> {
    let mut monitor = DistributedPhaseMonitor::new(&phase(&[("a", 400)]), &agents(&["x", "y"]), 1, 0);
    monitor.record("x", 1, &counts(&[("a", 150)]));
    monitor.record("y", 1, &counts(&[("a", 50)]));
    monitor.remove_agent("y");
    let remaining = monitor.remaining();
    monitor.reset(agents(&["x", "z"]), 2, remaining);

    if monitor.epoch() != 2 || monitor.remaining_total() != 200 {
        return Err(AppError::distributed(DistributedError::TestExpectationValue {
            message: "Unexpected state after reset",
            value: format!("epoch {} remaining {}", monitor.epoch(), monitor.remaining_total()),
        }));
    }
    // Counts from the previous epoch no longer apply.
    monitor.record("x", 1, &counts(&[("a", 190)]));
    monitor.record("x", 2, &counts(&[("a", 120)]));
    monitor.record("z", 2, &counts(&[("a", 80)]));
    if monitor.remaining_total() != 0 {
        return Err(AppError::distributed("Phase should be fully accounted"));
    }
    if monitor.phase_completed() != counts(&[("a", 400)]) {
        return Err(AppError::distributed("Phase total should include earlier epochs"));
    }
    Ok(())
}

#[test]
fn monitor_snapshot_restores_identically() -> AppResult<()> {
    let mut monitor = DistributedPhaseMonitor::new(&phase(&[("a", 9)]), &agents(&["x"]), 4, 1234);
    monitor.record("x", 4, &counts(&[("a", 3)]));
    let encoded = serde_json::to_string(&monitor.snapshot())?;
    let restored = DistributedPhaseMonitor::from_snapshot(serde_json::from_str(&encoded)?);
    if restored != monitor || restored.phase_start_ms() != 1234 {
        return Err(AppError::distributed("Snapshot should restore the monitor"));
    }
    Ok(())
}

struct EchoRoutes {
    hits: AtomicUsize,
}

#[async_trait]
impl RouteHandler for EchoRoutes {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/echo") => {
                let body: RegisterAgentRequest = request.json()?;
                HttpResponse::ok(&Ack { status: body.agent })
            }
            ("GET", "/busy") => Err(DistributedError::ExecutionInProgress.into()),
            _ => Err(HttpError::not_found()),
        }
    }
}

#[tokio::test]
async fn client_and_server_exchange_json() -> AppResult<()> {
    let listener = bind_listener("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    let routes = Arc::new(EchoRoutes {
        hits: AtomicUsize::new(0),
    });
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let server = tokio::spawn(serve(listener, routes.clone(), shutdown_rx));

    let client = ClusterClient::new(std::time::Duration::from_secs(2), 3)?;
    let ack: Ack = client
        .post_json(
            &addr,
            "/echo",
            &RegisterAgentRequest {
                agent: "agent-1".to_owned(),
            },
        )
        .await?;
    if ack.status != "agent-1" {
        return Err(AppError::distributed("Echo should return the agent id"));
    }

    // A rejection is reported once, without retries.
    match client.get_json::<Ack>(&addr, "/busy").await {
        Err(DistributedError::Rejected { status: 409, .. }) => {}
        other => {
            return Err(AppError::distributed(DistributedError::TestExpectationValue {
                message: "Expected a 409 rejection",
                value: format!("{:?}", other.map(|ack| ack.status)),
            }));
        }
    }
    if routes.hits.load(Ordering::SeqCst) != 2 {
        return Err(AppError::distributed("Rejected request must not be retried"));
    }
    match client.get_json::<Ack>(&addr, "/missing?x=1").await {
        Err(DistributedError::Rejected { status: 404, .. }) => {}
        _ => return Err(AppError::distributed("Unknown path should be a 404")),
    }

    if shutdown_tx.send(()).is_err() {
        return Err(AppError::distributed("Server already stopped"));
    }
    server.await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_peer_exhausts_retry_budget() -> AppResult<()> {
    let listener = bind_listener("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    drop(listener);

    let client = ClusterClient::new(std::time::Duration::from_millis(500), 2)?;
    match client.get_json::<Ack>(&addr, "/health").await {
        Err(DistributedError::Unreachable { attempts: 2, .. }) => Ok(()),
        _ => Err(AppError::distributed("Expected two failed attempts")),
    }
}
