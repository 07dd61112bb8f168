use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::LOCATION;
use tracing::warn;

use crate::error::AppResult;
use crate::metrics::{ResultSink, TestOutcome};
use crate::phase::{RequestTemplate, TestDefinition};

use super::{ContentPool, TestRunner};

/// Placeholder replaced by a random identifier from the agent's content pool.
const CONTENT_PLACEHOLDER: &str = "{content}";
/// Response bodies longer than this are not treated as content identifiers.
const MAX_CONTENT_BODY_BYTES: usize = 256;

/// Runs tests by issuing the HTTP request described by their template.
pub struct HttpTestRunner {
    client: Client,
    content: Arc<ContentPool>,
}

impl HttpTestRunner {
    /// Build a runner with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(request_timeout: Duration, content: Arc<ContentPool>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, content })
    }

    fn substitute(&self, text: &str) -> String {
        if !text.contains(CONTENT_PLACEHOLDER) {
            return text.to_owned();
        }
        match self.content.choose() {
            Some(item) => text.replace(CONTENT_PLACEHOLDER, &item),
            None => {
                warn!("Content pool is empty; '{}' left unresolved", CONTENT_PLACEHOLDER);
                text.to_owned()
            }
        }
    }

    async fn execute(&self, template: &RequestTemplate) -> TestOutcome {
        let mut request = self
            .client
            .request(template.method.into(), self.substitute(&template.url));
        for (key, value) in &template.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = template.body.as_deref() {
            request = request.body(self.substitute(body));
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return TestOutcome::failure(started.elapsed(), err.to_string()),
        };
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.ok();
        let latency = started.elapsed();

        let content = location.or_else(|| {
            body.map(|text| text.trim().to_owned())
                .filter(|text| !text.is_empty() && text.len() <= MAX_CONTENT_BODY_BYTES)
        });
        if status == template.expected_status {
            TestOutcome {
                content,
                ..TestOutcome::success(latency)
            }
        } else {
            TestOutcome::failure(
                latency,
                format!(
                    "expected status {}, got {}",
                    template.expected_status, status
                ),
            )
        }
    }
}

#[async_trait]
impl TestRunner for HttpTestRunner {
    async fn run_test(&self, test: &TestDefinition, sink: &ResultSink) {
        let outcome = match test.request.as_ref() {
            Some(template) => self.execute(template).await,
            None => TestOutcome::failure(Duration::ZERO, "test defines no request"),
        };
        if let Err(err) = sink.record(test, outcome) {
            warn!("Failed to record result for {}: {}", test.name, err);
        }
    }
}
