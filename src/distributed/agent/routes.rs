use std::sync::Arc;

use async_trait::async_trait;

use super::super::http::{HttpError, HttpRequest, HttpResponse, RouteHandler};
use super::super::protocol::{Ack, ContentSample, RedistributionInstructions, TaskPayload, paths};
use super::AgentNode;

pub(super) struct AgentRoutes {
    agent: Arc<AgentNode>,
}

impl AgentRoutes {
    pub(super) const fn new(agent: Arc<AgentNode>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl RouteHandler for AgentRoutes {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let agent = &self.agent;
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", paths::HEALTH) => HttpResponse::ok(&Ack::ok()),
            ("GET", paths::HEARTBEAT) => HttpResponse::ok(&agent.heartbeat()),
            ("GET", paths::STATUS) => HttpResponse::ok(&agent.status_report()),
            ("POST", paths::SUBMIT_TASK) => {
                let payload: TaskPayload = request.json()?;
                agent.submit_task(payload).await?;
                HttpResponse::ok(&Ack::accepted())
            }
            ("POST", paths::REBALANCE) => {
                let instructions: RedistributionInstructions = request.json()?;
                agent.rebalance(&instructions)?;
                HttpResponse::ok(&Ack::ok())
            }
            ("POST", paths::SAMPLE_CONTENT) => {
                let sample: ContentSample = request.json()?;
                agent.replace_content(sample.items);
                HttpResponse::ok(&Ack::ok())
            }
            ("POST", paths::FINISH) => {
                agent.finish_task().await;
                HttpResponse::ok(&Ack::ok())
            }
            _ => Err(HttpError::not_found()),
        }
    }
}
