//! Per-test execution results and latency histograms.
mod histogram;
mod results;

#[cfg(test)]
mod tests;

pub use histogram::LatencyHistogram;
pub use results::{ResultSink, TestOutcome, TestReport, TestSummary, merge_summaries};
