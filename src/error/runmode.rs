use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunModeError {
    #[error("Unknown run mode property '{key}' for {mode} mode.")]
    UnknownProperty { key: String, mode: &'static str },
    #[error("Invalid value '{value}' for run mode property '{key}': {source}")]
    InvalidProperty {
        key: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Run mode property '{key}' requires a ramp, but the run mode has none.")]
    RampNotConfigured { key: String },
    #[error("Ramp property '{key}' must be > 0.")]
    ZeroRampProperty { key: &'static str },
    #[error("Redistribution names unknown test '{test}'.")]
    UnknownTest { test: String },
    #[error("Worker count mismatch after resize (expected {expected}, live {actual}).")]
    WorkerCountMismatch { expected: usize, actual: usize },
    #[error("Worker {worker} was retired but is still counted as live.")]
    RetiredWorkerCounted { worker: u64 },
    #[error("Run mode state lock poisoned.")]
    StatePoisoned,
    #[error("Cannot split run mode across zero agents.")]
    NoAgents,
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
