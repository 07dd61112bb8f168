//! Cluster roles and their HTTP control plane.
pub mod agent;
pub mod driver;
mod http;
pub mod monitor;
pub mod protocol;
mod utils;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::info;

use crate::config::Configuration;
use crate::error::{AppError, AppResult};
use crate::runner::{ContentPool, HttpTestRunner, TestRunner};
use crate::shutdown::ShutdownReceiver;

use agent::AgentNode;
use driver::{ClusterTopology, DriverNode};
use http::{ClusterClient, bind_listener};
use protocol::{Ack, paths};

/// Run a driver until shutdown.
///
/// # Errors
///
/// Returns an error if the driver id cannot be resolved or the listener
/// cannot be bound.
pub async fn run_driver(
    config: Configuration,
    listen: &str,
    driver_id: Option<usize>,
    shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let settings = config.distributed().clone();
    let topology = ClusterTopology::resolve(settings.drivers.clone(), listen, driver_id)?;
    let listener = bind_listener(listen).await?;
    info!(
        "Driver {} listening on {} ({} driver(s) in the cluster)",
        topology.self_id(),
        listen,
        topology.size()
    );
    let driver = DriverNode::new(topology, settings, config.content_capacity())?;
    driver.run(listener, shutdown_rx).await;
    Ok(())
}

/// Run an agent with the HTTP test runner until shutdown.
///
/// # Errors
///
/// Returns an error if no driver is configured or the listener cannot be
/// bound.
pub async fn run_agent(
    config: Configuration,
    listen: &str,
    advertise: Option<&str>,
    shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let settings = config.distributed().clone();
    let content = Arc::new(ContentPool::new(config.content_capacity()));
    let runner: Arc<dyn TestRunner> =
        Arc::new(HttpTestRunner::new(settings.request_timeout, content.clone())?);
    run_agent_with_runner(config, listen, advertise, runner, content, shutdown_rx).await
}

/// Run an agent with a caller-provided runner.
///
/// # Errors
///
/// Returns an error if no driver is configured or the listener cannot be
/// bound.
pub async fn run_agent_with_runner(
    config: Configuration,
    listen: &str,
    advertise: Option<&str>,
    runner: Arc<dyn TestRunner>,
    content: Arc<ContentPool>,
    shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let settings = config.distributed().clone();
    let id = advertise.unwrap_or(listen).to_owned();
    let agent = AgentNode::new(id.clone(), settings, config.content_capacity(), runner, content)?;
    let listener = bind_listener(listen).await?;
    info!("Agent {} listening on {}", id, listen);
    agent.run(listener, shutdown_rx).await;
    Ok(())
}

/// Send an execution plan (JSON or TOML document) to a driver.
///
/// # Errors
///
/// Returns an error if the driver is unreachable or rejects the plan.
pub async fn submit_plan(config: &Configuration, driver: &str, plan: &str) -> AppResult<()> {
    let settings = config.distributed();
    let client = ClusterClient::new(settings.request_timeout, settings.retry_attempts)?;
    let ack: Ack = client
        .post_text(driver, paths::CONFIG, plan)
        .await
        .map_err(AppError::distributed)?;
    info!("Driver {} answered: {}", driver, ack.status);
    Ok(())
}
