use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DistributedError;

use super::super::http::{HttpError, HttpRequest, HttpResponse, RouteHandler};
use super::super::protocol::{Ack, CandidateNotice, paths};
use super::processor::{MasterProcessor, RequestProcessor, processor_for};
use super::{DriverNode, DriverRole};

pub(super) struct DriverRoutes {
    driver: Arc<DriverNode>,
}

impl DriverRoutes {
    pub(super) const fn new(driver: Arc<DriverNode>) -> Self {
        Self { driver }
    }

    /// Forwarded requests are only served by the master, never relayed again.
    fn master_only(&self) -> Result<MasterProcessor, HttpError> {
        if self.driver.role() == DriverRole::Master {
            return Ok(MasterProcessor::new(self.driver.clone()));
        }
        let master = self
            .driver
            .master_address()
            .map_or_else(|| "none".to_owned(), |(id, _)| id.to_string());
        Err(DistributedError::NotMaster { master }.into())
    }
}

#[async_trait]
impl RouteHandler for DriverRoutes {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let driver = &self.driver;
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", paths::HEALTH) => HttpResponse::ok(&driver.health()),
            ("POST", paths::CONFIG) => {
                let ack = processor_for(driver).submit_plan(request.text()?).await?;
                HttpResponse::json(202, &ack)
            }
            ("POST", paths::REGISTER_AGENT) => {
                HttpResponse::ok(&processor_for(driver).register_agent(request.json()?).await?)
            }
            ("POST", paths::PHASE_FINISHED) => {
                HttpResponse::ok(&processor_for(driver).phase_finished(request.json()?).await?)
            }
            ("POST", paths::CONTENT_ACK) => {
                HttpResponse::ok(&processor_for(driver).content_ack(request.json()?).await?)
            }
            ("POST", paths::FORWARD_CONFIG) => {
                let ack = self.master_only()?.submit_plan(request.text()?).await?;
                HttpResponse::json(202, &ack)
            }
            ("POST", paths::FORWARD_REGISTER) => {
                HttpResponse::ok(&self.master_only()?.register_agent(request.json()?).await?)
            }
            ("POST", paths::FORWARD_PHASE_FINISHED) => {
                HttpResponse::ok(&self.master_only()?.phase_finished(request.json()?).await?)
            }
            ("POST", paths::FORWARD_CONTENT_ACK) => {
                HttpResponse::ok(&self.master_only()?.content_ack(request.json()?).await?)
            }
            ("POST", paths::INVALIDATE_CANDIDATE) => {
                let notice: CandidateNotice = request.json()?;
                driver.on_candidate_invalidated(notice.id)?;
                HttpResponse::ok(&Ack::ok())
            }
            ("POST", paths::MASTER_ELECTED) => {
                let notice: CandidateNotice = request.json()?;
                driver.on_master_announced(notice.id);
                HttpResponse::ok(&Ack::ok())
            }
            ("GET", paths::UPDATES) => {
                self.master_only()?;
                HttpResponse::ok(&driver.cluster_snapshot())
            }
            _ => Err(HttpError::not_found()),
        }
    }
}
