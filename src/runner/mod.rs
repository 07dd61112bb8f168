//! Test execution collaborators: the runner contract and the HTTP runner.
mod content;
mod http;

#[cfg(test)]
mod tests;

use async_trait::async_trait;

use crate::metrics::ResultSink;
use crate::phase::TestDefinition;

pub use content::ContentPool;
pub use http::HttpTestRunner;

/// Executes one instance of a test and records the outcome.
///
/// Workers call this once per claimed execution; implementations must record
/// exactly one outcome into `sink` per call.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_test(&self, test: &TestDefinition, sink: &ResultSink);
}
