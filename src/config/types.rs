use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;
use crate::phase::HttpMethod;

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub distributed: Option<DistributedConfig>,
    /// Default run mode for phases that do not define their own.
    pub run_mode: Option<RunModeConfig>,
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
    /// Content identifiers an agent keeps for `{content}` substitution.
    pub content_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DistributedConfig {
    pub drivers: Option<Vec<String>>,
    pub heartbeat_interval: Option<DurationValue>,
    pub redistribution_wait: Option<DurationValue>,
    pub retry_attempts: Option<usize>,
    pub readiness_timeout: Option<DurationValue>,
    pub shutdown_grace: Option<DurationValue>,
    pub request_timeout: Option<DurationValue>,
    pub content_sample_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunModeConfig {
    pub concurrency: Option<u64>,
    pub load: Option<u64>,
    pub wait_time: Option<DurationValue>,
    pub round_interval: Option<DurationValue>,
    pub pool_size: Option<u64>,
    pub ramp: Option<RampConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RampConfig {
    pub start: u64,
    pub end: u64,
    pub rate: Option<u64>,
    pub interval: Option<DurationValue>,
    /// Derive `rate` and `interval` from the time the ramp should take.
    pub duration: Option<DurationValue>,
    pub initial_delay: Option<DurationValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    pub run_mode: Option<RunModeConfig>,
    #[serde(default)]
    pub tests: Vec<TestConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestConfig {
    pub name: String,
    pub count: u64,
    pub measurable: Option<bool>,
    pub records_content: Option<bool>,
    pub request: Option<RequestConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    pub method: Option<HttpMethod>,
    pub url: String,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    pub expected_status: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => {
                if *secs == 0 {
                    Err(ValidationError::DurationZero)
                } else {
                    Ok(Duration::from_secs(*secs))
                }
            }
            DurationValue::Text(text) => super::parse_duration_value(text),
        }
    }

    pub(crate) fn to_duration_allow_zero(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => super::parse_duration_value_allow_zero(text),
        }
    }
}
