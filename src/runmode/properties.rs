use std::collections::BTreeMap;

use crate::error::RunModeError;

use super::RunMode;

const CONCURRENCY: &str = "concurrency";
const WAIT_TIME_MS: &str = "wait_time_ms";
const LOAD: &str = "load";
const ROUND_INTERVAL_MS: &str = "round_interval_ms";
const POOL_SIZE: &str = "pool_size";
const RAMP_START: &str = "start";
const RAMP_END: &str = "end";
const RAMP_RATE: &str = "rate";
const RAMP_INTERVAL_MS: &str = "interval_ms";
const RAMP_INITIAL_DELAY_MS: &str = "initial_delay_ms";

/// One instructed run mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunModeProperty {
    Concurrency(u64),
    WaitTimeMs(u64),
    Load(u64),
    RoundIntervalMs(u64),
    PoolSize(u64),
    RampStart(u64),
    RampEnd(u64),
    RampRate(u64),
    RampIntervalMs(u64),
    RampInitialDelayMs(u64),
}

/// A validated run mode delta.
///
/// Parsing checks every key against the target mode before anything is
/// applied, so a malformed delta never leaves a half-updated engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunModeChanges {
    properties: Vec<RunModeProperty>,
}

impl RunModeChanges {
    /// Parse wire properties against the mode they will be applied to.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys, non-numeric values, ramp keys on a
    /// mode without a ramp, or a zero ramp rate/interval.
    pub fn parse(mode: &RunMode, raw: &BTreeMap<String, String>) -> Result<Self, RunModeError> {
        let mut properties = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let number = value
                .trim()
                .parse::<u64>()
                .map_err(|source| RunModeError::InvalidProperty {
                    key: key.clone(),
                    value: value.clone(),
                    source,
                })?;
            let property = match (mode, key.as_str()) {
                (RunMode::Normal(_), CONCURRENCY) => RunModeProperty::Concurrency(number),
                (RunMode::Normal(_), WAIT_TIME_MS) => RunModeProperty::WaitTimeMs(number),
                (RunMode::ConstantLoad(_), LOAD) => RunModeProperty::Load(number),
                (RunMode::ConstantLoad(_), ROUND_INTERVAL_MS) => {
                    RunModeProperty::RoundIntervalMs(number)
                }
                (RunMode::ConstantLoad(_), POOL_SIZE) => RunModeProperty::PoolSize(number),
                (_, RAMP_START) => RunModeProperty::RampStart(number),
                (_, RAMP_END) => RunModeProperty::RampEnd(number),
                (_, RAMP_RATE) => RunModeProperty::RampRate(number),
                (_, RAMP_INTERVAL_MS) => RunModeProperty::RampIntervalMs(number),
                (_, RAMP_INITIAL_DELAY_MS) => RunModeProperty::RampInitialDelayMs(number),
                _ => {
                    return Err(RunModeError::UnknownProperty {
                        key: key.clone(),
                        mode: mode.kind(),
                    });
                }
            };
            if property.is_ramp() && mode.ramp().is_none() {
                return Err(RunModeError::RampNotConfigured { key: key.clone() });
            }
            match property {
                RunModeProperty::RampRate(0) => {
                    return Err(RunModeError::ZeroRampProperty { key: RAMP_RATE });
                }
                RunModeProperty::RampIntervalMs(0) => {
                    return Err(RunModeError::ZeroRampProperty {
                        key: RAMP_INTERVAL_MS,
                    });
                }
                _ => {}
            }
            properties.push(property);
        }
        Ok(Self { properties })
    }

    /// Wire properties describing every field of `mode`.
    #[must_use]
    pub fn describe(mode: &RunMode) -> BTreeMap<String, String> {
        let mut raw = BTreeMap::new();
        match mode {
            RunMode::Normal(normal) => {
                raw.insert(CONCURRENCY.to_owned(), normal.concurrency.to_string());
                raw.insert(WAIT_TIME_MS.to_owned(), normal.wait_time_ms.to_string());
            }
            RunMode::ConstantLoad(constant) => {
                raw.insert(LOAD.to_owned(), constant.load.to_string());
                raw.insert(
                    ROUND_INTERVAL_MS.to_owned(),
                    constant.round_interval_ms.to_string(),
                );
                raw.insert(POOL_SIZE.to_owned(), constant.pool_size.to_string());
            }
        }
        if let Some(ramp) = mode.ramp() {
            raw.insert(RAMP_START.to_owned(), ramp.start.to_string());
            raw.insert(RAMP_END.to_owned(), ramp.end.to_string());
            raw.insert(RAMP_RATE.to_owned(), ramp.rate.to_string());
            raw.insert(RAMP_INTERVAL_MS.to_owned(), ramp.interval_ms.to_string());
            raw.insert(
                RAMP_INITIAL_DELAY_MS.to_owned(),
                ramp.initial_delay_ms.to_string(),
            );
        }
        raw
    }

    /// New concurrency or load, if the delta changes it.
    #[must_use]
    pub fn level(&self) -> Option<u64> {
        self.properties.iter().rev().find_map(|property| match property {
            RunModeProperty::Concurrency(value) | RunModeProperty::Load(value) => Some(*value),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    #[must_use]
    pub fn properties(&self) -> &[RunModeProperty] {
        &self.properties
    }

    /// Assign every instructed field.
    pub fn apply_to(&self, mode: &mut RunMode) {
        for property in &self.properties {
            match (property, &mut *mode) {
                (RunModeProperty::Concurrency(value), RunMode::Normal(normal)) => {
                    normal.concurrency = *value;
                }
                (RunModeProperty::WaitTimeMs(value), RunMode::Normal(normal)) => {
                    normal.wait_time_ms = *value;
                }
                (RunModeProperty::Load(value), RunMode::ConstantLoad(constant)) => {
                    constant.load = *value;
                }
                (RunModeProperty::RoundIntervalMs(value), RunMode::ConstantLoad(constant)) => {
                    constant.round_interval_ms = *value;
                }
                (RunModeProperty::PoolSize(value), RunMode::ConstantLoad(constant)) => {
                    constant.pool_size = *value;
                }
                (ramp_property, mode) => {
                    if let Some(ramp) = mode.ramp_mut() {
                        match ramp_property {
                            RunModeProperty::RampStart(value) => ramp.start = *value,
                            RunModeProperty::RampEnd(value) => ramp.end = *value,
                            RunModeProperty::RampRate(value) => ramp.rate = *value,
                            RunModeProperty::RampIntervalMs(value) => ramp.interval_ms = *value,
                            RunModeProperty::RampInitialDelayMs(value) => {
                                ramp.initial_delay_ms = *value;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }
}

impl RunModeProperty {
    #[must_use]
    pub const fn is_ramp(&self) -> bool {
        matches!(
            self,
            RunModeProperty::RampStart(_)
                | RunModeProperty::RampEnd(_)
                | RunModeProperty::RampRate(_)
                | RunModeProperty::RampIntervalMs(_)
                | RunModeProperty::RampInitialDelayMs(_)
        )
    }
}
