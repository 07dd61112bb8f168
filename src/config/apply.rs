use std::collections::BTreeSet;
use std::time::Duration;

use url::Url;

use crate::args::{PositiveU64, PositiveUsize};
use crate::error::{ConfigError, ValidationError};
use crate::phase::{HttpMethod, Phase, RequestTemplate, TestDefinition};
use crate::runmode::{ConstantLoadMode, NormalMode, Ramp, RunMode};

use super::types::{
    ConfigFile, DistributedConfig, DurationValue, PhaseConfig, RampConfig, RequestConfig,
    RunModeConfig, TestConfig,
};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_REDISTRIBUTION_WAIT: Duration = Duration::from_secs(2);
const DEFAULT_RETRY_ATTEMPTS: usize = 3;
const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONTENT_SAMPLE_SIZE: usize = 100;
const DEFAULT_CONTENT_CAPACITY: usize = 1000;
const DEFAULT_ROUND_INTERVAL_MS: u64 = 1000;
const DEFAULT_POOL_SIZE: u64 = 256;

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    phases: Vec<Phase>,
    run_mode: Option<RunMode>,
    distributed: DistributedSettings,
    content_capacity: usize,
}

/// Cluster timing and membership settings shared by drivers and agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedSettings {
    pub drivers: Vec<String>,
    pub heartbeat_interval: Duration,
    pub redistribution_wait: Duration,
    pub retry_attempts: usize,
    pub readiness_timeout: Duration,
    pub shutdown_grace: Duration,
    pub request_timeout: Duration,
    pub content_sample_size: usize,
}

impl Default for DistributedSettings {
    fn default() -> Self {
        Self {
            drivers: Vec::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            redistribution_wait: DEFAULT_REDISTRIBUTION_WAIT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            content_sample_size: DEFAULT_CONTENT_SAMPLE_SIZE,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            phases: Vec::new(),
            run_mode: None,
            distributed: DistributedSettings::default(),
            content_capacity: DEFAULT_CONTENT_CAPACITY,
        }
    }
}

impl Configuration {
    /// Validate a parsed config file.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid durations, non-positive sizes, malformed
    /// run modes, or duplicate phase/test names.
    pub fn from_file(file: &ConfigFile) -> Result<Self, ConfigError> {
        let distributed = match file.distributed.as_ref() {
            Some(config) => distributed_settings(config)?,
            None => DistributedSettings::default(),
        };
        let run_mode = file.run_mode.as_ref().map(run_mode).transpose()?;

        let mut names = BTreeSet::new();
        let mut phases = Vec::with_capacity(file.phases.len());
        for config in &file.phases {
            if !names.insert(config.name.as_str()) {
                return Err(ConfigError::DuplicatePhase {
                    phase: config.name.clone(),
                });
            }
            phases.push(phase(config, run_mode.as_ref())?);
        }

        let content_capacity = match file.content_capacity {
            Some(value) => ensure_positive_usize(value, "content_capacity")?,
            None => DEFAULT_CONTENT_CAPACITY,
        };

        Ok(Self {
            phases,
            run_mode,
            distributed,
            content_capacity,
        })
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Default run mode applied to phases without their own.
    #[must_use]
    pub const fn run_mode(&self) -> Option<&RunMode> {
        self.run_mode.as_ref()
    }

    #[must_use]
    pub const fn distributed(&self) -> &DistributedSettings {
        &self.distributed
    }

    #[must_use]
    pub const fn content_capacity(&self) -> usize {
        self.content_capacity
    }

    /// Replace the configured driver list, e.g. from `--drivers`.
    pub fn set_drivers(&mut self, drivers: Vec<String>) {
        self.distributed.drivers = drivers;
    }

    #[must_use]
    pub fn into_phases(self) -> Vec<Phase> {
        self.phases
    }
}

fn distributed_settings(config: &DistributedConfig) -> Result<DistributedSettings, ConfigError> {
    let defaults = DistributedSettings::default();
    Ok(DistributedSettings {
        drivers: config.drivers.clone().unwrap_or_default(),
        heartbeat_interval: duration_or(
            config.heartbeat_interval.as_ref(),
            "distributed.heartbeat_interval",
            defaults.heartbeat_interval,
        )?,
        redistribution_wait: duration_or(
            config.redistribution_wait.as_ref(),
            "distributed.redistribution_wait",
            defaults.redistribution_wait,
        )?,
        retry_attempts: match config.retry_attempts {
            Some(value) => ensure_positive_usize(value, "distributed.retry_attempts")?,
            None => defaults.retry_attempts,
        },
        readiness_timeout: duration_or(
            config.readiness_timeout.as_ref(),
            "distributed.readiness_timeout",
            defaults.readiness_timeout,
        )?,
        shutdown_grace: duration_or(
            config.shutdown_grace.as_ref(),
            "distributed.shutdown_grace",
            defaults.shutdown_grace,
        )?,
        request_timeout: duration_or(
            config.request_timeout.as_ref(),
            "distributed.request_timeout",
            defaults.request_timeout,
        )?,
        content_sample_size: match config.content_sample_size {
            Some(value) => ensure_positive_usize(value, "distributed.content_sample_size")?,
            None => defaults.content_sample_size,
        },
    })
}

fn phase(config: &PhaseConfig, default_mode: Option<&RunMode>) -> Result<Phase, ConfigError> {
    if config.tests.is_empty() {
        return Err(ConfigError::PhaseWithoutTests {
            phase: config.name.clone(),
        });
    }
    let run_mode = match (config.run_mode.as_ref(), default_mode) {
        (Some(mode), _) => run_mode(mode)?,
        (None, Some(mode)) => mode.clone(),
        (None, None) => {
            return Err(ConfigError::PhaseWithoutRunMode {
                phase: config.name.clone(),
            });
        }
    };

    let mut names = BTreeSet::new();
    let mut tests = Vec::with_capacity(config.tests.len());
    for test in &config.tests {
        if !names.insert(test.name.as_str()) {
            return Err(ConfigError::DuplicateTest {
                phase: config.name.clone(),
                test: test.name.clone(),
            });
        }
        tests.push(test_definition(test)?);
    }

    Ok(Phase {
        name: config.name.clone(),
        tests,
        run_mode,
    })
}

fn test_definition(config: &TestConfig) -> Result<TestDefinition, ConfigError> {
    let request = config
        .request
        .as_ref()
        .map(|request| -> Result<RequestTemplate, ConfigError> {
            validate_url(&request.url).map_err(|source| ConfigError::InvalidRequest {
                test: config.name.clone(),
                source,
            })?;
            Ok(request_template(request))
        })
        .transpose()?;
    Ok(TestDefinition {
        name: config.name.clone(),
        count: config.count,
        measurable: config.measurable.unwrap_or(true),
        records_content: config.records_content.unwrap_or(false),
        request,
    })
}

/// `{content}` placeholders are allowed anywhere after the host.
fn validate_url(raw: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(raw).map_err(|source| ValidationError::InvalidUrl {
        url: raw.to_owned(),
        source,
    })?;
    if parsed.host_str().is_none() {
        return Err(ValidationError::UrlMissingHost {
            url: raw.to_owned(),
        });
    }
    Ok(())
}

fn request_template(config: &RequestConfig) -> RequestTemplate {
    RequestTemplate {
        method: config.method.unwrap_or(HttpMethod::Get),
        url: config.url.clone(),
        headers: config
            .headers
            .as_ref()
            .map(|headers| {
                headers
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default(),
        body: config.body.clone(),
        expected_status: config.expected_status.unwrap_or(200),
    }
}

fn run_mode(config: &RunModeConfig) -> Result<RunMode, ConfigError> {
    let ramp = config.ramp.as_ref().map(ramp).transpose()?;
    let constant_load = config.load.is_some()
        || config.round_interval.is_some()
        || config.pool_size.is_some();
    if config.concurrency.is_some() == constant_load {
        return Err(ConfigError::RunModeKind {
            left: "concurrency",
            right: "load",
        });
    }

    if let Some(concurrency) = config.concurrency {
        let concurrency = level(concurrency, ramp.as_ref(), "run_mode.concurrency")?;
        let wait_time_ms = config
            .wait_time
            .as_ref()
            .map(|value| {
                value
                    .to_duration_allow_zero()
                    .map_err(|source| ConfigError::InvalidDuration {
                        field: "run_mode.wait_time",
                        source,
                    })
            })
            .transpose()?
            .map_or(0, duration_ms);
        return Ok(RunMode::Normal(NormalMode {
            concurrency,
            wait_time_ms,
            ramp,
        }));
    }

    let load = level(config.load.unwrap_or(0), ramp.as_ref(), "run_mode.load")?;
    let round_interval_ms = config
        .round_interval
        .as_ref()
        .map(|value| {
            value
                .to_duration()
                .map_err(|source| ConfigError::InvalidDuration {
                    field: "run_mode.round_interval",
                    source,
                })
        })
        .transpose()?
        .map_or(DEFAULT_ROUND_INTERVAL_MS, duration_ms);
    let pool_size = match config.pool_size {
        Some(value) => PositiveU64::try_from(value)
            .map_err(|source| ConfigError::FieldMustBePositive {
                field: "run_mode.pool_size".to_owned(),
                source,
            })?
            .get(),
        None => DEFAULT_POOL_SIZE,
    };
    Ok(RunMode::ConstantLoad(ConstantLoadMode {
        load,
        round_interval_ms,
        pool_size,
        ramp,
    }))
}

/// With a ramp the level starts at the ramp's start; without one it must be
/// positive.
fn level(value: u64, ramp: Option<&Ramp>, field: &str) -> Result<u64, ConfigError> {
    if let Some(ramp) = ramp {
        return Ok(ramp.start);
    }
    PositiveU64::try_from(value)
        .map(PositiveU64::get)
        .map_err(|source| ConfigError::FieldMustBePositive {
            field: field.to_owned(),
            source,
        })
}

fn ramp(config: &RampConfig) -> Result<Ramp, ConfigError> {
    let initial_delay_ms = config
        .initial_delay
        .as_ref()
        .map(|value| {
            value
                .to_duration_allow_zero()
                .map_err(|source| ConfigError::InvalidDuration {
                    field: "ramp.initial_delay",
                    source,
                })
        })
        .transpose()?
        .map_or(0, duration_ms);

    let mut ramp = match (config.rate, config.interval.as_ref(), config.duration.as_ref()) {
        (Some(rate), Some(interval), _) => {
            let rate = PositiveU64::try_from(rate)
                .map_err(|source| ConfigError::FieldMustBePositive {
                    field: "ramp.rate".to_owned(),
                    source,
                })?
                .get();
            let interval = interval
                .to_duration()
                .map_err(|_| ConfigError::RampIntervalZero)?;
            Ramp {
                start: config.start,
                end: config.end,
                rate,
                interval_ms: duration_ms(interval),
                initial_delay_ms: 0,
            }
        }
        (_, _, Some(duration)) => {
            let duration = duration
                .to_duration()
                .map_err(|source| ConfigError::InvalidDuration {
                    field: "ramp.duration",
                    source,
                })?;
            Ramp::over_duration(config.start, config.end, duration)
        }
        _ => return Err(ConfigError::RampUnderspecified),
    };
    if ramp.interval_ms == 0 {
        return Err(ConfigError::RampIntervalZero);
    }
    ramp.initial_delay_ms = initial_delay_ms;
    Ok(ramp)
}

fn duration_or(
    value: Option<&DurationValue>,
    field: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => value
            .to_duration()
            .map_err(|source| ConfigError::InvalidDuration { field, source }),
        None => Ok(default),
    }
}

fn ensure_positive_usize(value: usize, field: &str) -> Result<usize, ConfigError> {
    PositiveUsize::try_from(value)
        .map(PositiveUsize::get)
        .map_err(|source| ConfigError::FieldMustBePositive {
            field: field.to_owned(),
            source,
        })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
