use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::phase::TestDefinition;
use crate::runner::ContentPool;

use super::LatencyHistogram;

/// Result of one test execution as reported by a [`crate::runner::TestRunner`].
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub latency: Duration,
    pub success: bool,
    /// Identifier of content the execution created, if it created any.
    pub content: Option<String>,
    pub error: Option<String>,
}

impl TestOutcome {
    #[must_use]
    pub const fn success(latency: Duration) -> Self {
        Self {
            latency,
            success: true,
            content: None,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            latency,
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// Per-test totals shipped from an agent to the master at phase end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSummary {
    pub test: String,
    pub executions: u64,
    pub errors: u64,
    #[serde(default)]
    pub histogram_b64: Option<String>,
}

/// Cluster-wide totals for one test, derived from merged summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub test: String,
    pub executions: u64,
    pub errors: u64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug)]
struct TestStats {
    executions: u64,
    errors: u64,
    histogram: Option<LatencyHistogram>,
}

/// Collects the results of every execution an agent performs during a phase.
#[derive(Debug)]
pub struct ResultSink {
    tests: Mutex<BTreeMap<String, TestStats>>,
    created: ContentPool,
}

impl ResultSink {
    #[must_use]
    pub fn new(content_capacity: usize) -> Self {
        Self {
            tests: Mutex::new(BTreeMap::new()),
            created: ContentPool::new(content_capacity),
        }
    }

    /// Record the outcome of one execution of `test`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink lock is poisoned or the latency cannot be
    /// recorded.
    pub fn record(&self, test: &TestDefinition, outcome: TestOutcome) -> Result<(), MetricsError> {
        if let Some(error) = outcome.error.as_deref() {
            tracing::debug!("Test {} failed: {}", test.name, error);
        }
        if let (true, Some(content)) = (test.records_content, outcome.content) {
            self.created.offer(content);
        }

        let mut tests = self.tests.lock().map_err(|_| MetricsError::SinkPoisoned)?;
        if !tests.contains_key(&test.name) {
            let histogram = if test.measurable {
                Some(LatencyHistogram::new()?)
            } else {
                None
            };
            tests.insert(
                test.name.clone(),
                TestStats {
                    executions: 0,
                    errors: 0,
                    histogram,
                },
            );
        }
        let Some(stats) = tests.get_mut(&test.name) else {
            return Ok(());
        };
        stats.executions = stats.executions.saturating_add(1);
        if !outcome.success {
            stats.errors = stats.errors.saturating_add(1);
        }
        if let Some(histogram) = stats.histogram.as_mut() {
            let latency_ms = u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX);
            histogram.record(latency_ms)?;
        }
        Ok(())
    }

    /// Snapshot the per-test totals recorded so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink lock is poisoned or a histogram cannot be
    /// encoded.
    pub fn summaries(&self) -> Result<Vec<TestSummary>, MetricsError> {
        let tests = self.tests.lock().map_err(|_| MetricsError::SinkPoisoned)?;
        let mut summaries = Vec::with_capacity(tests.len());
        for (name, stats) in tests.iter() {
            let histogram_b64 = match stats.histogram.as_ref() {
                Some(histogram) => Some(histogram.encode_base64()?),
                None => None,
            };
            summaries.push(TestSummary {
                test: name.clone(),
                executions: stats.executions,
                errors: stats.errors,
                histogram_b64,
            });
        }
        Ok(summaries)
    }

    /// Content identifiers created by executions so far, emptying the sample.
    #[must_use]
    pub fn take_content(&self) -> Vec<String> {
        self.created.drain()
    }
}

/// Merge summaries from every agent into one report per test, ordered by name.
///
/// # Errors
///
/// Returns an error if a histogram payload cannot be decoded or merged.
pub fn merge_summaries(summaries: &[TestSummary]) -> Result<Vec<TestReport>, MetricsError> {
    let mut merged: BTreeMap<&str, (u64, u64, Option<LatencyHistogram>)> = BTreeMap::new();
    for summary in summaries {
        let entry = merged
            .entry(summary.test.as_str())
            .or_insert((0, 0, None));
        entry.0 = entry.0.saturating_add(summary.executions);
        entry.1 = entry.1.saturating_add(summary.errors);
        if let Some(encoded) = summary.histogram_b64.as_deref() {
            let histogram = LatencyHistogram::decode_base64(encoded)?;
            match entry.2.as_mut() {
                Some(existing) => existing.merge(&histogram)?,
                None => entry.2 = Some(histogram),
            }
        }
    }

    Ok(merged
        .into_iter()
        .map(|(test, (executions, errors, histogram))| {
            let (p50_ms, p90_ms, p99_ms) = histogram
                .as_ref()
                .map_or((0, 0, 0), LatencyHistogram::percentiles);
            TestReport {
                test: test.to_owned(),
                executions,
                errors,
                p50_ms,
                p90_ms,
                p99_ms,
            }
        })
        .collect())
}
