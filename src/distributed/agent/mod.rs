//! Agents: register with the drivers, execute assigned phase shares and
//! report progress back.
mod routes;
mod task;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::DistributedSettings;
use crate::error::{AppError, AppResult, ConfigError, DistributedError};
use crate::runner::{ContentPool, TestRunner};
use crate::shutdown::ShutdownReceiver;

use super::http::{ClusterClient, serve};
use super::protocol::{
    Ack, HeartbeatReport, RedistributionInstructions, RegisterAgentRequest, StatusReport,
    TaskPayload, paths,
};
use super::utils::current_time_ms;

use routes::AgentRoutes;
use task::ActiveTask;

/// Missed master polls after which the agent registers again.
const REGISTRATION_STALE_HEARTBEATS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    BuildingConfig,
    Running,
}

pub(crate) struct AgentNode {
    id: String,
    drivers: Vec<String>,
    settings: DistributedSettings,
    content_capacity: usize,
    client: ClusterClient,
    runner: Arc<dyn TestRunner>,
    content: Arc<ContentPool>,
    status: RwLock<AgentStatus>,
    task: Mutex<Option<Arc<ActiveTask>>>,
    last_polled_ms: AtomicU64,
}

impl AgentNode {
    /// # Errors
    ///
    /// Returns an error if no driver is configured or the HTTP client cannot
    /// be built.
    pub(crate) fn new(
        id: String,
        settings: DistributedSettings,
        content_capacity: usize,
        runner: Arc<dyn TestRunner>,
        content: Arc<ContentPool>,
    ) -> AppResult<Arc<Self>> {
        if settings.drivers.is_empty() {
            return Err(AppError::config(ConfigError::NoDrivers));
        }
        let client = ClusterClient::new(settings.request_timeout, settings.retry_attempts)?;
        Ok(Arc::new(Self {
            id,
            drivers: settings.drivers.clone(),
            settings,
            content_capacity,
            client,
            runner,
            content,
            status: RwLock::new(AgentStatus::Idle),
            task: Mutex::new(None),
            last_polled_ms: AtomicU64::new(0),
        }))
    }

    /// Serve, register, then keep serving until shutdown.
    pub(crate) async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown_rx: ShutdownReceiver) {
        self.set_status(AgentStatus::BuildingConfig);
        let routes = Arc::new(AgentRoutes::new(self.clone()));
        let server = tokio::spawn(serve(listener, routes, shutdown_rx.resubscribe()));

        tokio::select! {
            _ = shutdown_rx.recv() => {}
            () = self.register() => {
                self.set_status(AgentStatus::Running);
                self.last_polled_ms.store(current_time_ms(), Ordering::Release);
                tokio::select! {
                    _ = shutdown_rx.recv() => {}
                    () = self.registration_watchdog() => {}
                }
            }
        }

        if server.await.is_err() {
            warn!("Agent server task ended abnormally");
        }
        self.finish_task().await;
        info!("Agent {} stopped", self.id);
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn status(&self) -> AgentStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<Arc<ActiveTask>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_task(&self) -> Option<Arc<ActiveTask>> {
        self.lock_task().clone()
    }

    async fn register(&self) {
        let request = RegisterAgentRequest {
            agent: self.id.clone(),
        };
        loop {
            match self.post_to_drivers::<_, Ack>(paths::REGISTER_AGENT, &request).await {
                Ok(_) => {
                    info!("Agent {} registered", self.id);
                    return;
                }
                Err(err) => {
                    warn!("Registration failed ({}); retrying", err);
                    tokio::time::sleep(self.settings.heartbeat_interval).await;
                }
            }
        }
    }

    /// Register again when the master has not polled for a while, e.g. after
    /// it dropped this agent or a new master took over without it.
    async fn registration_watchdog(&self) {
        let interval = self.settings.heartbeat_interval;
        let stale = interval.saturating_mul(REGISTRATION_STALE_HEARTBEATS);
        loop {
            tokio::time::sleep(interval).await;
            let last = self.last_polled_ms.load(Ordering::Acquire);
            if current_time_ms().saturating_sub(last) < super::utils::duration_to_ms(stale) {
                continue;
            }
            debug!("No heartbeat poll for {:?}; registering again", stale);
            let request = RegisterAgentRequest {
                agent: self.id.clone(),
            };
            if self
                .post_to_drivers::<_, Ack>(paths::REGISTER_AGENT, &request)
                .await
                .is_ok()
            {
                self.last_polled_ms.store(current_time_ms(), Ordering::Release);
            }
        }
    }

    /// Deliver to the first driver that accepts; candidates relay to the
    /// master.
    async fn post_to_drivers<B, R>(&self, path: &'static str, body: &B) -> Result<R, DistributedError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        for driver in &self.drivers {
            match self.client.post_json(driver, path, body).await {
                Ok(response) => return Ok(response),
                Err(err) => debug!("Driver {} did not accept {}: {}", driver, path, err),
            }
        }
        Err(DistributedError::NoDriverReachable { path })
    }

    fn heartbeat(&self) -> HeartbeatReport {
        self.last_polled_ms.store(current_time_ms(), Ordering::Release);
        match self.current_task() {
            Some(task) => task.heartbeat(&self.id),
            None => HeartbeatReport {
                agent: self.id.clone(),
                ..HeartbeatReport::default()
            },
        }
    }

    fn status_report(&self) -> StatusReport {
        let task = self.current_task();
        StatusReport {
            status: self.status(),
            phase: task.as_ref().map(|task| task.phase().to_owned()),
            context: task.and_then(|task| task.context()),
        }
    }

    async fn submit_task(self: &Arc<Self>, payload: TaskPayload) -> AppResult<()> {
        let previous = self.lock_task().take();
        if let Some(previous) = previous {
            info!("Replacing task for phase '{}'", previous.phase());
            previous.close().await;
        }
        let task = ActiveTask::start(self, payload)?;
        *self.lock_task() = Some(task.clone());
        tokio::spawn(task::report_loop(self.clone(), task));
        Ok(())
    }

    fn rebalance(&self, instructions: &RedistributionInstructions) -> AppResult<()> {
        let task = self
            .current_task()
            .ok_or_else(|| AppError::distributed(DistributedError::NoTask))?;
        task.rebalance(instructions)
    }

    fn replace_content(&self, items: Vec<String>) {
        debug!("Content pool replaced with {} item(s)", items.len());
        self.content.replace(items);
    }

    async fn finish_task(&self) {
        let task = self.lock_task().take();
        if let Some(task) = task {
            info!("Finishing phase '{}'", task.phase());
            task.close().await;
        }
    }

    fn shutdown_grace(&self) -> Duration {
        self.settings.shutdown_grace
    }
}
