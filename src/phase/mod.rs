//! Phases: a test suite plus the run mode that drives it.
mod splitter;
mod suite;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::runmode::RunMode;

pub use splitter::{distribute, distribute_for_rebalance};
pub use suite::TestSuite;

/// One scheduled batch of load generation, executed cluster-wide before the
/// next phase begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub tests: Vec<TestDefinition>,
    pub run_mode: RunMode,
}

impl Phase {
    /// Copy of this phase carrying different per-test counts and run mode.
    ///
    /// Tests missing from `counts` get a count of zero.
    #[must_use]
    pub fn with_share(&self, counts: &BTreeMap<String, u64>, run_mode: RunMode) -> Self {
        Self {
            name: self.name.clone(),
            tests: self
                .tests
                .iter()
                .map(|test| TestDefinition {
                    count: counts.get(&test.name).copied().unwrap_or(0),
                    ..test.clone()
                })
                .collect(),
            run_mode,
        }
    }

    /// Copy of this phase with the given remaining counts and the same run mode.
    #[must_use]
    pub fn with_counts(&self, counts: &BTreeMap<String, u64>) -> Self {
        self.with_share(counts, self.run_mode.clone())
    }

    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.tests
            .iter()
            .map(|test| (test.name.clone(), test.count))
            .collect()
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.tests
            .iter()
            .fold(0u64, |acc, test| acc.saturating_add(test.count))
    }
}

/// A named test and how many times the cluster must execute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub name: String,
    /// Remaining executions; the configured total until a redistribution
    /// rewrites it.
    pub count: u64,
    /// Non-measurable tests (setup steps) are counted but not timed.
    #[serde(default = "default_measurable")]
    pub measurable: bool,
    #[serde(default)]
    pub records_content: bool,
    #[serde(default)]
    pub request: Option<RequestTemplate>,
}

const fn default_measurable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

const fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
    Head,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}
