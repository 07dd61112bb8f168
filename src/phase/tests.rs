use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult, ConfigError};
use crate::runmode::{NormalMode, Ramp, RunMode};

use super::{Phase, TestDefinition, TestSuite, distribute, distribute_for_rebalance};

fn test(name: &str, count: u64) -> TestDefinition {
    TestDefinition {
        name: name.to_owned(),
        count,
        measurable: true,
        records_content: false,
        request: None,
    }
}

fn phase(tests: Vec<TestDefinition>, concurrency: u64) -> Phase {
    Phase {
        name: "warmup".to_owned(),
        tests,
        run_mode: RunMode::Normal(NormalMode {
            concurrency,
            wait_time_ms: 0,
            ramp: None,
        }),
    }
}

fn agents(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

fn count_of(phase: Option<&Phase>, test: &str) -> Option<u64> {
    phase?.counts().get(test).copied()
}

#[test]
fn distribute_gives_remainder_to_first_agent() -> AppResult<()> {
    let source = phase(vec![test("browse", 201), test("search", 4)], 10);
    let split = distribute(&source, &agents(&["a", "b"]))?;
    if count_of(split.get("a"), "browse") != Some(101)
        || count_of(split.get("b"), "browse") != Some(100)
    {
        return Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Unexpected browse split",
            value: format!("{:?}", split),
        }));
    }
    if count_of(split.get("b"), "search") != Some(2) {
        return Err(AppError::config("Every agent receives the whole suite"));
    }
    let total: u64 = split.values().map(Phase::total_count).sum();
    if total != source.total_count() {
        return Err(AppError::config("Split must preserve the total count"));
    }
    if split.get("a").map(|phase| phase.run_mode.level()) != Some(5) {
        return Err(AppError::config("Run mode should be split too"));
    }
    Ok(())
}

#[test]
fn distribute_rejects_empty_agent_list() -> AppResult<()> {
    let source = phase(vec![test("browse", 1)], 1);
    if distribute(&source, &[]).is_ok() {
        return Err(AppError::config("Splitting across zero agents must fail"));
    }
    Ok(())
}

#[test]
fn rebalance_split_orders_existing_agents_first() -> AppResult<()> {
    let mut source = phase(vec![test("browse", 100)], 0);
    source.run_mode = RunMode::Normal(NormalMode {
        concurrency: 0,
        wait_time_ms: 0,
        ramp: Some(Ramp {
            start: 0,
            end: 30,
            rate: 3,
            interval_ms: 1000,
            initial_delay_ms: 0,
        }),
    });
    let split = distribute_for_rebalance(
        &source,
        &agents(&["old"]),
        &agents(&["new-1", "new-2"]),
        Duration::from_secs(5),
    )?;
    if count_of(split.get("old"), "browse") != Some(34) {
        return Err(AppError::config("Existing agent takes the count remainder"));
    }
    let levels: Vec<u64> = ["old", "new-1", "new-2"]
        .iter()
        .filter_map(|agent| split.get(*agent))
        .map(|phase| phase.run_mode.level())
        .collect();
    if levels != vec![5, 5, 5] {
        return Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Unexpected rebalance levels",
            value: format!("{:?}", levels),
        }));
    }
    Ok(())
}

#[test]
fn with_counts_zeroes_unknown_tests() -> AppResult<()> {
    let source = phase(vec![test("browse", 10), test("search", 10)], 1);
    let remaining = source.with_counts(&BTreeMap::from([("browse".to_owned(), 3)]));
    if remaining.counts() != BTreeMap::from([("browse".to_owned(), 3), ("search".to_owned(), 0)]) {
        return Err(AppError::config("Missing counts should become zero"));
    }
    Ok(())
}

#[test]
fn suite_claims_round_robin_until_exhausted() -> AppResult<()> {
    let suite = TestSuite::new(&[test("a", 2), test("b", 1)]);
    let mut claimed = Vec::new();
    while let Some(idx) = suite.claim_next() {
        let name = suite
            .test(idx)
            .map(|test| test.name.clone())
            .ok_or(ConfigError::TestExpectation {
                message: "Claimed index without test",
            })?;
        suite.mark_completed(idx);
        claimed.push(name);
    }
    claimed.sort();
    if claimed != vec!["a", "a", "b"] {
        return Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Unexpected claims",
            value: format!("{:?}", claimed),
        }));
    }
    if !suite.is_exhausted() {
        return Err(AppError::config("Suite should be exhausted"));
    }
    suite.reset_completed();
    if suite.completed_snapshot().values().any(|value| *value != 0) {
        return Err(AppError::config("Reset should zero completed counts"));
    }
    if !suite.set_remaining("b", 4) {
        return Err(AppError::config("Known test should be updated"));
    }
    let remaining = suite.remaining_snapshot();
    if remaining != BTreeMap::from([("a".to_owned(), 0), ("b".to_owned(), 4)]) {
        return Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Unexpected remaining snapshot",
            value: format!("{:?}", remaining),
        }));
    }
    if suite.set_remaining("missing", 1) {
        return Err(AppError::config("Unknown test should not be updated"));
    }
    Ok(())
}

#[tokio::test]
async fn suite_claims_are_exact_under_contention() -> AppResult<()> {
    let suite = Arc::new(TestSuite::new(&[test("a", 500), test("b", 300)]));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let suite = Arc::clone(&suite);
        handles.push(tokio::spawn(async move {
            let mut claims = 0u64;
            while let Some(idx) = suite.claim_next() {
                suite.mark_completed(idx);
                claims = claims.saturating_add(1);
                tokio::task::yield_now().await;
            }
            claims
        }));
    }
    let mut total = 0u64;
    for handle in handles {
        total = total.saturating_add(handle.await?);
    }
    if total != 800 || suite.completed_snapshot().values().sum::<u64>() != 800 {
        return Err(AppError::config(ConfigError::TestExpectationValue {
            message: "Claims must match counts exactly",
            value: total.to_string(),
        }));
    }
    Ok(())
}
