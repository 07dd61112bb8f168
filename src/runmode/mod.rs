//! Run modes: how an agent turns a test suite into load.
//!
//! `Normal` keeps one persistent worker per concurrency unit; `ConstantLoad`
//! submits a fixed number of executions per round regardless of latency. Both
//! support an optional linear ramp between `start` and `end`.
mod balancer;
mod constant_load;
mod context;
mod engine;
mod normal;
mod properties;
mod splitter;


use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use context::{RunContext, WorkerRuns};
pub use engine::RunModeEngine;
pub use properties::{RunModeChanges, RunModeProperty};
pub use splitter::{distribute, distribute_for_rebalance, split_total};

/// Smallest ramp interval derived from a ramp duration.
const MIN_DERIVED_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunMode {
    Normal(NormalMode),
    ConstantLoad(ConstantLoadMode),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalMode {
    /// Current number of persistent workers. With a ramp this starts at
    /// `ramp.start` and follows the ramp.
    pub concurrency: u64,
    #[serde(default)]
    pub wait_time_ms: u64,
    #[serde(default)]
    pub ramp: Option<Ramp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantLoadMode {
    /// Executions submitted per round.
    pub load: u64,
    #[serde(default = "default_round_interval_ms")]
    pub round_interval_ms: u64,
    /// Upper bound on executions in flight at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: u64,
    #[serde(default)]
    pub ramp: Option<Ramp>,
}

const fn default_round_interval_ms() -> u64 {
    1000
}

const fn default_pool_size() -> u64 {
    256
}

/// Linear change of the run level from `start` to `end`, by `rate` every
/// `interval_ms`, beginning after `initial_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ramp {
    pub start: u64,
    pub end: u64,
    pub rate: u64,
    pub interval_ms: u64,
    #[serde(default)]
    pub initial_delay_ms: u64,
}

impl Ramp {
    /// Derive the smallest rate and interval that move from `start` to `end`
    /// within `duration`, ticking at most once per second.
    #[must_use]
    pub fn over_duration(start: u64, end: u64, duration: Duration) -> Self {
        let span = start.abs_diff(end);
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        if span == 0 {
            return Self {
                start,
                end,
                rate: 1,
                interval_ms: duration_ms.max(MIN_DERIVED_INTERVAL_MS),
                initial_delay_ms: 0,
            };
        }
        let per_step = duration_ms.checked_div(span).unwrap_or(0);
        if per_step >= MIN_DERIVED_INTERVAL_MS {
            return Self {
                start,
                end,
                rate: 1,
                interval_ms: per_step,
                initial_delay_ms: 0,
            };
        }
        let ticks = duration_ms
            .checked_div(MIN_DERIVED_INTERVAL_MS)
            .unwrap_or(0)
            .max(1);
        Self {
            start,
            end,
            rate: span.div_ceil(ticks),
            interval_ms: MIN_DERIVED_INTERVAL_MS,
            initial_delay_ms: 0,
        }
    }

    #[must_use]
    pub const fn is_ascending(&self) -> bool {
        self.start <= self.end
    }

    /// Move `current` one tick toward `end`, never past it.
    #[must_use]
    pub fn step(&self, current: u64) -> u64 {
        if current < self.end {
            current.saturating_add(self.rate).min(self.end)
        } else {
            current.saturating_sub(self.rate).max(self.end)
        }
    }

    /// Level the ramp has reached `elapsed` after the phase started.
    #[must_use]
    pub fn estimate_current(&self, elapsed: Duration) -> u64 {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let ramping_ms = elapsed_ms.saturating_sub(self.initial_delay_ms);
        let ticks = ramping_ms.checked_div(self.interval_ms).unwrap_or(0);
        let moved = ticks.saturating_mul(self.rate);
        if self.is_ascending() {
            self.start.saturating_add(moved).min(self.end)
        } else {
            self.start.saturating_sub(moved).max(self.end)
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl RunMode {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            RunMode::Normal(_) => "normal",
            RunMode::ConstantLoad(_) => "constant_load",
        }
    }

    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self, RunMode::Normal(_))
    }

    /// Current concurrency (`Normal`) or per-round load (`ConstantLoad`).
    #[must_use]
    pub const fn level(&self) -> u64 {
        match self {
            RunMode::Normal(mode) => mode.concurrency,
            RunMode::ConstantLoad(mode) => mode.load,
        }
    }

    pub fn set_level(&mut self, level: u64) {
        match self {
            RunMode::Normal(mode) => mode.concurrency = level,
            RunMode::ConstantLoad(mode) => mode.load = level,
        }
    }

    #[must_use]
    pub const fn ramp(&self) -> Option<&Ramp> {
        match self {
            RunMode::Normal(mode) => mode.ramp.as_ref(),
            RunMode::ConstantLoad(mode) => mode.ramp.as_ref(),
        }
    }

    pub fn ramp_mut(&mut self) -> Option<&mut Ramp> {
        match self {
            RunMode::Normal(mode) => mode.ramp.as_mut(),
            RunMode::ConstantLoad(mode) => mode.ramp.as_mut(),
        }
    }
}
