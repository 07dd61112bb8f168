//! Drivers: one elected master coordinates agents; candidates mirror it and
//! forward agent traffic.
mod agents;
mod balancer;
mod election;
mod executor;
mod heartbeat;
mod processor;
mod rebalance;
mod routes;
mod topology;
mod tracker;


use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DistributedSettings;
use crate::error::AppResult;
use crate::runner::ContentPool;
use crate::shutdown::ShutdownReceiver;

use super::http::{ClusterClient, serve};
use super::monitor::DistributedPhaseMonitor;
use super::protocol::{Ack, CandidateNotice, ClusterSnapshot, DriverHealth, paths};

use agents::RegisteredAgents;
use rebalance::DriverRebalancer;
use routes::DriverRoutes;
use tracker::ExecutionTracker;

pub use balancer::{BalancerStatus, RebalanceOutcome, RebalanceWork, TaskBalancer};
pub use election::{DriverRole, ElectionOutcome, MasterElection};
pub use heartbeat::detect_upstream_rebalance;
pub use topology::ClusterTopology;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Leadership {
    role: DriverRole,
    master: Option<usize>,
}

pub(crate) struct DriverNode {
    topology: ClusterTopology,
    settings: DistributedSettings,
    client: ClusterClient,
    election: MasterElection,
    leadership: RwLock<Leadership>,
    agents: RegisteredAgents,
    tracker: ExecutionTracker,
    balancer: TaskBalancer,
    content: ContentPool,
    shadow: Mutex<Option<ClusterSnapshot>>,
    role_task: Mutex<Option<JoinHandle<()>>>,
    plan_task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DriverNode {
    pub(crate) fn new(
        topology: ClusterTopology,
        settings: DistributedSettings,
        content_capacity: usize,
    ) -> AppResult<Arc<Self>> {
        let client = ClusterClient::new(settings.request_timeout, settings.retry_attempts)?;
        Ok(Arc::new_cyclic(|driver| Self {
            election: MasterElection::new(topology.size()),
            balancer: TaskBalancer::new(
                settings.redistribution_wait,
                Arc::new(DriverRebalancer::new(driver.clone())),
            ),
            topology,
            settings,
            client,
            leadership: RwLock::new(Leadership {
                role: DriverRole::Candidate,
                master: None,
            }),
            agents: RegisteredAgents::new(Vec::new()),
            tracker: ExecutionTracker::default(),
            content: ContentPool::new(content_capacity),
            shadow: Mutex::new(None),
            role_task: Mutex::new(None),
            plan_task: Mutex::new(None),
        }))
    }

    /// Elect, then serve requests until shutdown.
    pub(crate) async fn run(self: Arc<Self>, listener: TcpListener, shutdown_rx: ShutdownReceiver) {
        self.apply_election();
        let routes = Arc::new(DriverRoutes::new(self.clone()));
        serve(listener, routes, shutdown_rx).await;
        self.stop_tasks();
        info!("Driver {} stopped", self.topology.self_id());
    }

    fn leadership(&self) -> Leadership {
        *self
            .leadership
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn role(&self) -> DriverRole {
        self.leadership().role
    }

    fn master_address(&self) -> Option<(usize, String)> {
        let master = self.leadership().master?;
        self.topology
            .address(master)
            .map(|addr| (master, addr.to_owned()))
    }

    fn apply_election(self: &Arc<Self>) {
        let self_id = self.topology.self_id();
        let outcome = self.election.elect_master(self_id);
        info!(
            "Driver {} elected driver {} as master",
            self_id, outcome.master_id
        );
        self.adopt(Leadership {
            role: outcome.role,
            master: Some(outcome.master_id),
        });
    }

    /// Switch to `next`, restarting role tasks when the role or master changed.
    fn adopt(self: &Arc<Self>, next: Leadership) {
        let previous = {
            let mut leadership = self
                .leadership
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let previous = *leadership;
            *leadership = next;
            previous
        };
        if previous == next {
            return;
        }
        if let Some(task) = lock(&self.role_task).take() {
            task.abort();
        }
        let driver = self.clone();
        let task = match next.role {
            DriverRole::Master => {
                info!("Driver {} is now the master", self.topology.self_id());
                executor::resume_from_shadow(self);
                tokio::spawn(async move {
                    driver.announce_master().await;
                    heartbeat::agent_heartbeat_loop(driver).await;
                })
            }
            DriverRole::Candidate => {
                if previous.role == DriverRole::Master {
                    warn!(
                        "Driver {} stepping down; execution state is left to the new master",
                        self.topology.self_id()
                    );
                    self.stop_plan();
                }
                tokio::spawn(heartbeat::master_ping_loop(driver))
            }
        };
        *lock(&self.role_task) = Some(task);
    }

    async fn announce_master(&self) {
        let notice = CandidateNotice {
            id: self.topology.self_id(),
        };
        let sends = self.topology.peers().map(|(id, addr)| {
            let client = self.client.clone();
            async move {
                if let Err(err) = client
                    .post_once::<_, Ack>(addr, paths::MASTER_ELECTED, &notice)
                    .await
                {
                    debug!("Announcement to driver {} failed: {}", id, err);
                }
            }
        });
        join_all(sends).await;
    }

    /// The master stopped answering: mark it, tell every peer, elect again.
    async fn fail_over(self: Arc<Self>, master_id: usize) {
        if let Err(err) = self.election.mark_candidate_invalid(master_id) {
            warn!("Cannot invalidate driver {}: {}", master_id, err);
        }
        let notice = CandidateNotice { id: master_id };
        let sends = self
            .topology
            .peers()
            .filter(|(id, _)| *id != master_id)
            .map(|(id, addr)| {
                let client = self.client.clone();
                async move {
                    if let Err(err) = client
                        .post_once::<_, Ack>(addr, paths::INVALIDATE_CANDIDATE, &notice)
                        .await
                    {
                        debug!("Invalidation notice to driver {} failed: {}", id, err);
                    }
                }
            });
        join_all(sends).await;
        self.apply_election();
    }

    fn on_candidate_invalidated(self: &Arc<Self>, id: usize) -> AppResult<()> {
        if id == self.topology.self_id() {
            debug!("Ignoring invalidation of this driver");
            return Ok(());
        }
        self.election.mark_candidate_invalid(id)?;
        if self.leadership().master == Some(id) {
            self.apply_election();
        }
        Ok(())
    }

    fn on_master_announced(self: &Arc<Self>, id: usize) {
        let self_id = self.topology.self_id();
        if id == self_id {
            return;
        }
        self.election.revalidate(id);
        let current = self.leadership();
        if current.role == DriverRole::Master && id > self_id {
            // A higher id claims mastership: remind it who leads.
            if let Some(addr) = self.topology.address(id) {
                let client = self.client.clone();
                let addr = addr.to_owned();
                let notice = CandidateNotice { id: self_id };
                tokio::spawn(async move {
                    if let Err(err) = client
                        .post_once::<_, Ack>(&addr, paths::MASTER_ELECTED, &notice)
                        .await
                    {
                        debug!("Re-announcement to driver {} failed: {}", id, err);
                    }
                });
            }
            return;
        }
        info!("Driver {} acknowledges driver {} as master", self_id, id);
        self.adopt(Leadership {
            role: DriverRole::Candidate,
            master: Some(id),
        });
    }

    fn store_shadow(&self, snapshot: ClusterSnapshot) {
        let mut shadow = lock(&self.shadow);
        if let Some(previous) = shadow.as_ref()
            && detect_upstream_rebalance(previous, &snapshot)
        {
            let remaining = snapshot
                .execution
                .as_ref()
                .and_then(|execution| execution.monitor.clone())
                .map(|monitor| {
                    DistributedPhaseMonitor::from_snapshot(monitor).remaining_total()
                })
                .unwrap_or(0);
            info!(
                "Upstream rebalance detected on master {}; {} executions remain",
                snapshot.master, remaining
            );
        }
        *shadow = Some(snapshot);
    }

    fn take_shadow(&self) -> Option<ClusterSnapshot> {
        lock(&self.shadow).take()
    }

    fn cluster_snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            master: self.topology.self_id(),
            agents: self.agents.snapshot(),
            execution: self.tracker.snapshot(),
        }
    }

    fn health(&self) -> DriverHealth {
        let leadership = self.leadership();
        DriverHealth {
            id: self.topology.self_id(),
            role: leadership.role,
            master: leadership.master,
            agents: self.agents.len(),
            executing: self.tracker.is_running(),
            completed_plans: self.tracker.completed_plans(),
        }
    }

    /// Membership bookkeeping shared by direct and forwarded registrations.
    fn register_agent(&self, agent: &str) {
        if self.agents.register(agent) {
            info!("Agent {} registered", agent);
        }
        if self.tracker.is_executing_phase() && !self.tracker.is_active(agent) {
            self.balancer.agent_joined(agent);
        }
    }

    fn stop_plan(&self) {
        if let Some(task) = lock(&self.plan_task).take() {
            task.abort();
        }
        self.balancer.clear();
        self.tracker.abandon();
    }

    fn stop_tasks(&self) {
        if let Some(task) = lock(&self.role_task).take() {
            task.abort();
        }
        if let Some(task) = lock(&self.plan_task).take() {
            task.abort();
        }
        self.balancer.clear();
    }
}
