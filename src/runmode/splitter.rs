use std::time::Duration;

use crate::error::RunModeError;

use super::{Ramp, RunMode};

/// Divide `total` into `parts` shares; the remainder goes to the first share.
///
/// `split_total(320, 3)` is `[108, 106, 106]`.
#[must_use]
pub fn split_total(total: u64, parts: usize) -> Vec<u64> {
    let Ok(divisor) = u64::try_from(parts) else {
        return Vec::new();
    };
    if divisor == 0 {
        return Vec::new();
    }
    let base = total.checked_div(divisor).unwrap_or(0);
    let remainder = total.checked_rem(divisor).unwrap_or(0);
    let mut shares = vec![base; parts];
    if let Some(first) = shares.first_mut() {
        *first = base.saturating_add(remainder);
    }
    shares
}

/// Split a run mode across `agents` agents.
///
/// Fixed levels are divided with [`split_total`]. A ramp whose rate can be
/// divided is scaled down per agent; otherwise agents take turns ticking the
/// original rate, phase-shifted by one original interval each.
///
/// # Errors
///
/// Returns an error when `agents` is zero.
pub fn distribute(run_mode: &RunMode, agents: usize) -> Result<Vec<RunMode>, RunModeError> {
    if agents == 0 {
        return Err(RunModeError::NoAgents);
    }
    let Some(ramp) = run_mode.ramp() else {
        return Ok(split_total(run_mode.level(), agents)
            .into_iter()
            .map(|share| {
                let mut mode = run_mode.clone();
                mode.set_level(share);
                mode
            })
            .collect());
    };

    let ramps = split_ramp(ramp, agents);
    Ok(ramps
        .into_iter()
        .map(|agent_ramp| {
            let mut mode = run_mode.clone();
            mode.set_level(agent_ramp.start);
            if let Some(slot) = mode.ramp_mut() {
                *slot = agent_ramp;
            }
            mode
        })
        .collect())
}

fn split_ramp(ramp: &Ramp, agents: usize) -> Vec<Ramp> {
    let agent_count = u64::try_from(agents).unwrap_or(u64::MAX);
    if ramp.rate >= agent_count {
        let starts = split_total(ramp.start, agents);
        let ends = split_total(ramp.end, agents);
        let rates = split_total(ramp.rate, agents);
        return starts
            .into_iter()
            .zip(ends)
            .zip(rates)
            .map(|((start, end), rate)| Ramp {
                start,
                end,
                rate,
                ..ramp.clone()
            })
            .collect();
    }

    let interval_ms = ramp.interval_ms.saturating_mul(agent_count);
    (0..agent_count)
        .map(|index| {
            let offset = index.saturating_mul(ramp.rate);
            let start = if ramp.is_ascending() {
                ramp.start.saturating_add(offset).min(ramp.end)
            } else {
                ramp.start.saturating_sub(offset).max(ramp.end)
            };
            Ramp {
                start,
                end: ramp.end,
                rate: ramp.rate,
                interval_ms,
                initial_delay_ms: ramp
                    .initial_delay_ms
                    .saturating_add(index.saturating_mul(ramp.interval_ms)),
            }
        })
        .collect()
}

/// Split a run mode over `existing ++ new` agents in the middle of a phase.
///
/// Ramps are resumed at the level the whole cluster should have reached after
/// `elapsed`: every agent starts from its share of that estimate, the
/// remainder landing on the first existing agent.
///
/// # Errors
///
/// Returns an error when there are no agents at all.
pub fn distribute_for_rebalance(
    run_mode: &RunMode,
    existing: usize,
    new: usize,
    elapsed: Duration,
) -> Result<Vec<RunMode>, RunModeError> {
    let total = existing.saturating_add(new);
    let mut modes = distribute(run_mode, total)?;
    let Some(ramp) = run_mode.ramp() else {
        return Ok(modes);
    };

    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let remaining_delay = ramp.initial_delay_ms.saturating_sub(elapsed_ms);
    let estimated = ramp.estimate_current(elapsed);
    let shares = split_total(estimated, total);
    for (mode, share) in modes.iter_mut().zip(shares) {
        mode.set_level(share);
        if let Some(agent_ramp) = mode.ramp_mut() {
            let stagger = agent_ramp
                .initial_delay_ms
                .saturating_sub(ramp.initial_delay_ms);
            agent_ramp.start = share;
            agent_ramp.initial_delay_ms = remaining_delay.saturating_add(stagger);
        }
    }
    Ok(modes)
}
