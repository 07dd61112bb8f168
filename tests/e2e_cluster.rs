
use std::fs;
use std::time::{Duration, Instant};

use tempfile::{TempDir, tempdir};

use loadmesh::config::{Configuration, load_config};
use loadmesh::distributed::protocol::DriverHealth;
use loadmesh::distributed::{run_agent, run_driver, submit_plan};
use loadmesh::shutdown::shutdown_channel;

use support_cluster::{pick_port, spawn_target_server};

const PLAN_COUNT: u64 = 400;

fn cluster_config(dir: &TempDir, name: &str, drivers: &[String]) -> Result<Configuration, String> {
    let document = serde_json::json!({
        "distributed": {
            "drivers": drivers,
            "heartbeat_interval": "100ms",
            "redistribution_wait": "200ms",
            "readiness_timeout": "5s",
            "request_timeout": "2s"
        }
    });
    let path = dir.path().join(format!("{}.json", name));
    let bytes = serde_json::to_vec_pretty(&document)
        .map_err(|err| format!("serialize config failed: {}", err))?;
    fs::write(&path, bytes).map_err(|err| format!("write config failed: {}", err))?;
    let file = load_config(Some(&path.to_string_lossy()))
        .map_err(|err| format!("load config failed: {}", err))?
        .ok_or_else(|| "config file missing".to_owned())?;
    Configuration::from_file(&file).map_err(|err| format!("invalid cluster config: {}", err))
}

fn plan_document(target: &str) -> Result<String, String> {
    let plan = serde_json::json!({
        "phases": [{
            "name": "warmup",
            "run_mode": { "concurrency": 4 },
            "tests": [{
                "name": "fetch",
                "count": PLAN_COUNT,
                "request": { "method": "get", "url": format!("{}/item", target) }
            }]
        }]
    });
    serde_json::to_string(&plan).map_err(|err| format!("serialize plan failed: {}", err))
}

async fn driver_health(client: &reqwest::Client, driver: &str) -> Option<DriverHealth> {
    let response = client
        .get(format!("http://{}/health", driver))
        .send()
        .await
        .ok()?;
    response.json::<DriverHealth>().await.ok()
}

async fn wait_for_health<F>(
    client: &reqwest::Client,
    driver: &str,
    timeout: Duration,
    ready: F,
) -> Result<DriverHealth, String>
where
    F: Fn(&DriverHealth) -> bool,
{
    let start = Instant::now();
    loop {
        if let Some(health) = driver_health(client, driver).await
            && ready(&health)
        {
            return Ok(health);
        }
        if start.elapsed() > timeout {
            return Err(format!("driver {} did not reach the expected state", driver));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_cluster_runs_plan_across_two_agents() -> Result<(), String> {
    let (target, server) = spawn_target_server()?;
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let driver = format!("127.0.0.1:{}", pick_port()?);
    let first_agent = format!("127.0.0.1:{}", pick_port()?);
    let second_agent = format!("127.0.0.1:{}", pick_port()?);
    let (shutdown_tx, _keep_rx) = shutdown_channel();

    let driver_task = tokio::spawn({
        let config = cluster_config(&dir, "driver", &[])?;
        let listen = driver.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        async move { run_driver(config, &listen, None, shutdown_rx).await }
    });

    let drivers = vec![driver.clone()];
    let mut agent_tasks = Vec::new();
    for listen in [first_agent, second_agent] {
        let config = cluster_config(&dir, "agent", &drivers)?;
        let shutdown_rx = shutdown_tx.subscribe();
        agent_tasks.push(tokio::spawn(async move {
            run_agent(config, &listen, None, shutdown_rx).await
        }));
    }

    let client = reqwest::Client::new();
    wait_for_health(&client, &driver, Duration::from_secs(10), |health| {
        health.agents == 2
    })
    .await?;

    let submitter = cluster_config(&dir, "submit", &drivers)?;
    submit_plan(&submitter, &driver, &plan_document(&target)?)
        .await
        .map_err(|err| format!("submit failed: {}", err))?;

    let health = wait_for_health(&client, &driver, Duration::from_secs(20), |health| {
        health.completed_plans == 1 && !health.executing
    })
    .await?;
    if health.master != Some(0) {
        return Err(format!("Unexpected master: {:?}", health.master));
    }

    let hits = server.hits();
    if hits != PLAN_COUNT {
        return Err(format!("Expected {} target hits, got {}", PLAN_COUNT, hits));
    }

    drop(shutdown_tx.send(()));
    for task in agent_tasks {
        task.await
            .map_err(|err| format!("agent task panicked: {}", err))?
            .map_err(|err| format!("agent failed: {}", err))?;
    }
    driver_task
        .await
        .map_err(|err| format!("driver task panicked: {}", err))?
        .map_err(|err| format!("driver failed: {}", err))?;
    Ok(())
}
