use super::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON config '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported config extension '{ext}'. Use .toml or .json.")]
    UnsupportedExtension { ext: String },
    #[error("Config file must have .toml or .json extension.")]
    MissingExtension,
    #[error("Execution request is neither valid JSON ({json}) nor valid TOML ({toml}).")]
    UnparseableExecutionRequest { json: String, toml: String },
    #[error("Config must define at least one phase.")]
    NoPhases,
    #[error("Phase '{phase}' must define at least one test.")]
    PhaseWithoutTests { phase: String },
    #[error("Phase '{phase}' has no run mode and no default run_mode is configured.")]
    PhaseWithoutRunMode { phase: String },
    #[error("Phase '{phase}' defines test '{test}' more than once.")]
    DuplicateTest { phase: String, test: String },
    #[error("Test '{test}' has an invalid request: {source}")]
    InvalidRequest {
        test: String,
        #[source]
        source: ValidationError,
    },
    #[error("Duplicate phase name '{phase}'.")]
    DuplicatePhase { phase: String },
    #[error("Run mode must define exactly one of '{left}' or '{right}'.")]
    RunModeKind {
        left: &'static str,
        right: &'static str,
    },
    #[error("Ramp must define rate and interval, or a duration to derive them from.")]
    RampUnderspecified,
    #[error("Ramp interval must be > 0.")]
    RampIntervalZero,
    #[error("Config '{field}' must be >= 1: {source}")]
    FieldMustBePositive {
        field: String,
        #[source]
        source: ValidationError,
    },
    #[error("Invalid duration for '{field}': {source}")]
    InvalidDuration {
        field: &'static str,
        #[source]
        source: ValidationError,
    },
    #[error("Driver id {id} is out of range for a cluster of {size} drivers.")]
    DriverIdOutOfRange { id: usize, size: usize },
    #[error("No driver addresses configured (set --drivers or distributed.drivers).")]
    NoDrivers,
    #[error("Listen address '{listen}' is not part of the driver list and no --driver-id was given.")]
    DriverIdUnresolved { listen: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
