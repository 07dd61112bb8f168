use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::parse_execution_request;
use crate::error::{AppError, DistributedError};

use super::super::http::HttpError;
use super::super::protocol::{Ack, ContentAck, PhaseFinishedReport, RegisterAgentRequest, paths};
use super::{DriverNode, DriverRole, executor};

/// Agent- and client-facing operations; the implementation depends on the
/// driver's current role.
#[async_trait]
pub(super) trait RequestProcessor: Send + Sync {
    async fn submit_plan(&self, body: String) -> Result<Ack, HttpError>;
    async fn register_agent(&self, request: RegisterAgentRequest) -> Result<Ack, HttpError>;
    async fn phase_finished(&self, report: PhaseFinishedReport) -> Result<Ack, HttpError>;
    async fn content_ack(&self, ack: ContentAck) -> Result<Ack, HttpError>;
}

pub(super) fn processor_for(driver: &Arc<DriverNode>) -> Box<dyn RequestProcessor> {
    match driver.role() {
        DriverRole::Master => Box::new(MasterProcessor {
            driver: driver.clone(),
        }),
        DriverRole::Candidate => Box::new(CandidateProcessor {
            driver: driver.clone(),
        }),
    }
}

pub(super) struct MasterProcessor {
    driver: Arc<DriverNode>,
}

impl MasterProcessor {
    pub(super) const fn new(driver: Arc<DriverNode>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl RequestProcessor for MasterProcessor {
    async fn submit_plan(&self, body: String) -> Result<Ack, HttpError> {
        let configuration = parse_execution_request(&body).map_err(AppError::from)?;
        executor::start_plan(&self.driver, configuration.into_phases())?;
        Ok(Ack::accepted())
    }

    async fn register_agent(&self, request: RegisterAgentRequest) -> Result<Ack, HttpError> {
        self.driver.register_agent(&request.agent);
        Ok(Ack::ok())
    }

    async fn phase_finished(&self, report: PhaseFinishedReport) -> Result<Ack, HttpError> {
        debug!(
            "Agent {} finished phase '{}' (epoch {})",
            report.agent, report.phase, report.epoch
        );
        self.driver.tracker.record_finished(report);
        Ok(Ack::ok())
    }

    async fn content_ack(&self, ack: ContentAck) -> Result<Ack, HttpError> {
        debug!("Agent {} acknowledged {} content item(s)", ack.agent, ack.items.len());
        self.driver.content.extend(ack.items);
        Ok(Ack::ok())
    }
}

/// Relays every request to the master's forwarding endpoints.
pub(super) struct CandidateProcessor {
    driver: Arc<DriverNode>,
}

impl CandidateProcessor {
    fn master(&self) -> Result<String, HttpError> {
        self.driver
            .master_address()
            .map(|(_, addr)| addr)
            .ok_or_else(|| HttpError::from(DistributedError::NoMaster))
    }
}

#[async_trait]
impl RequestProcessor for CandidateProcessor {
    async fn submit_plan(&self, body: String) -> Result<Ack, HttpError> {
        let master = self.master()?;
        Ok(self
            .driver
            .client
            .post_text(&master, paths::FORWARD_CONFIG, &body)
            .await?)
    }

    async fn register_agent(&self, request: RegisterAgentRequest) -> Result<Ack, HttpError> {
        let master = self.master()?;
        Ok(self
            .driver
            .client
            .post_json(&master, paths::FORWARD_REGISTER, &request)
            .await?)
    }

    async fn phase_finished(&self, report: PhaseFinishedReport) -> Result<Ack, HttpError> {
        let master = self.master()?;
        Ok(self
            .driver
            .client
            .post_json(&master, paths::FORWARD_PHASE_FINISHED, &report)
            .await?)
    }

    async fn content_ack(&self, ack: ContentAck) -> Result<Ack, HttpError> {
        let master = self.master()?;
        Ok(self
            .driver
            .client
            .post_json(&master, paths::FORWARD_CONTENT_ACK, &ack)
            .await?)
    }
}
