use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::AppResult;
use crate::runmode::{self, split_total};

use super::Phase;

/// Split a phase across `agents`: every agent receives the whole test suite
/// with an equal share of each test's count, the remainder going to the first
/// agent, plus its share of the run mode.
///
/// # Errors
///
/// Returns an error when `agents` is empty.
pub fn distribute(phase: &Phase, agents: &[String]) -> AppResult<BTreeMap<String, Phase>> {
    let modes = runmode::distribute(&phase.run_mode, agents.len())?;
    Ok(assemble(phase, agents, modes))
}

/// Split the remaining work of a running phase over `existing ++ new`.
///
/// `phase` must already carry the remaining counts; `elapsed` is the time
/// since the phase started and drives the ramp estimate.
///
/// # Errors
///
/// Returns an error when both agent lists are empty.
pub fn distribute_for_rebalance(
    phase: &Phase,
    existing: &[String],
    new: &[String],
    elapsed: Duration,
) -> AppResult<BTreeMap<String, Phase>> {
    let modes =
        runmode::distribute_for_rebalance(&phase.run_mode, existing.len(), new.len(), elapsed)?;
    let agents: Vec<String> = existing.iter().chain(new.iter()).cloned().collect();
    Ok(assemble(phase, &agents, modes))
}

fn assemble(
    phase: &Phase,
    agents: &[String],
    modes: Vec<crate::runmode::RunMode>,
) -> BTreeMap<String, Phase> {
    let test_shares: Vec<(String, Vec<u64>)> = phase
        .tests
        .iter()
        .map(|test| (test.name.clone(), split_total(test.count, agents.len())))
        .collect();

    agents
        .iter()
        .zip(modes)
        .enumerate()
        .map(|(idx, (agent, mode))| {
            let counts: BTreeMap<String, u64> = test_shares
                .iter()
                .map(|(name, shares)| (name.clone(), shares.get(idx).copied().unwrap_or(0)))
                .collect();
            (agent.clone(), phase.with_share(&counts, mode))
        })
        .collect()
}
