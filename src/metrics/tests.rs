use std::time::Duration;

use crate::error::{AppError, AppResult, MetricsError};
use crate::phase::TestDefinition;

use super::{LatencyHistogram, ResultSink, TestOutcome, TestSummary, merge_summaries};

fn test_definition(name: &str, measurable: bool) -> TestDefinition {
    TestDefinition {
        name: name.to_owned(),
        count: 10,
        measurable,
        records_content: false,
        request: None,
    }
}

fn build_hist(values: &[u64]) -> AppResult<LatencyHistogram> {
    let mut hist = LatencyHistogram::new()?;
    for value in values {
        hist.record(*value)?;
    }
    Ok(hist)
}

#[test]
fn histogram_round_trips_through_base64() -> AppResult<()> {
    let hist = build_hist(&[10, 20, 30])?;
    let decoded = LatencyHistogram::decode_base64(&hist.encode_base64()?)?;
    if decoded.count() != 3 {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected decoded count",
            value: decoded.count().to_string(),
        }));
    }
    Ok(())
}

#[test]
fn sink_skips_histogram_for_non_measurable_tests() -> AppResult<()> {
    let sink = ResultSink::new(4);
    let setup = test_definition("setup", false);
    let browse = test_definition("browse", true);
    sink.record(&setup, TestOutcome::success(Duration::from_millis(5)))?;
    sink.record(&browse, TestOutcome::success(Duration::from_millis(7)))?;
    sink.record(
        &browse,
        TestOutcome::failure(Duration::from_millis(9), "boom"),
    )?;

    let summaries = sink.summaries()?;
    let browse_summary = summaries
        .iter()
        .find(|summary| summary.test == "browse")
        .ok_or(MetricsError::TestExpectation {
            message: "Missing browse summary",
        })?;
    if browse_summary.executions != 2 || browse_summary.errors != 1 {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected browse totals",
            value: format!("{:?}", browse_summary),
        }));
    }
    if browse_summary.histogram_b64.is_none() {
        return Err(AppError::metrics("Measurable test should ship a histogram"));
    }
    let setup_summary = summaries
        .iter()
        .find(|summary| summary.test == "setup")
        .ok_or(MetricsError::TestExpectation {
            message: "Missing setup summary",
        })?;
    if setup_summary.histogram_b64.is_some() {
        return Err(AppError::metrics("Non-measurable test must not ship a histogram"));
    }
    Ok(())
}

#[test]
fn sink_collects_content_only_for_recording_tests() -> AppResult<()> {
    let sink = ResultSink::new(4);
    let mut create = test_definition("create", true);
    create.records_content = true;
    let browse = test_definition("browse", true);
    sink.record(
        &create,
        TestOutcome {
            content: Some("/items/1".to_owned()),
            ..TestOutcome::success(Duration::from_millis(1))
        },
    )?;
    sink.record(
        &browse,
        TestOutcome {
            content: Some("/ignored".to_owned()),
            ..TestOutcome::success(Duration::from_millis(1))
        },
    )?;
    let content = sink.take_content();
    if content != vec!["/items/1".to_owned()] {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected content",
            value: format!("{:?}", content),
        }));
    }
    Ok(())
}

#[test]
fn merge_summaries_adds_totals_and_histograms() -> AppResult<()> {
    let first = TestSummary {
        test: "browse".to_owned(),
        executions: 3,
        errors: 1,
        histogram_b64: Some(build_hist(&[10, 10, 10])?.encode_base64()?),
    };
    let second = TestSummary {
        test: "browse".to_owned(),
        executions: 1,
        errors: 0,
        histogram_b64: Some(build_hist(&[1000])?.encode_base64()?),
    };
    let setup = TestSummary {
        test: "setup".to_owned(),
        executions: 2,
        errors: 0,
        histogram_b64: None,
    };

    let reports = merge_summaries(&[first, setup, second])?;
    let names: Vec<&str> = reports.iter().map(|report| report.test.as_str()).collect();
    if names != vec!["browse", "setup"] {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected report order",
            value: format!("{:?}", names),
        }));
    }
    let Some(browse) = reports.first() else {
        return Err(AppError::metrics("Missing browse report"));
    };
    if browse.executions != 4 || browse.errors != 1 {
        return Err(AppError::metrics("Unexpected merged totals"));
    }
    if browse.p50_ms > 11 || browse.p99_ms < 990 {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected merged percentiles",
            value: format!("{:?}", browse),
        }));
    }
    Ok(())
}

#[test]
fn merge_summaries_rejects_corrupt_histograms() -> AppResult<()> {
    let corrupt = TestSummary {
        test: "browse".to_owned(),
        executions: 1,
        errors: 0,
        histogram_b64: Some("not base64!".to_owned()),
    };
    if merge_summaries(&[corrupt]).is_ok() {
        return Err(AppError::metrics("Corrupt histogram should be rejected"));
    }
    Ok(())
}
