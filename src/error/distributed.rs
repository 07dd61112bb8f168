use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("Missing required option: {option}")]
    MissingOption { option: &'static str },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{addr}{path} unreachable after {attempts} attempts: {source}")]
    Unreachable {
        addr: String,
        path: &'static str,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("{addr}{path} answered {status}: {message}")]
    Rejected {
        addr: String,
        path: &'static str,
        status: u16,
        message: String,
    },
    #[error("Cannot distribute a phase across zero agents.")]
    NoAgents,
    #[error("No phase is executing.")]
    NoActivePhase,
    #[error("No task is assigned to this agent.")]
    NoTask,
    #[error("An execution plan is already running.")]
    ExecutionInProgress,
    #[error("This driver is not the master (current master: {master}).")]
    NotMaster { master: String },
    #[error("No master is currently elected.")]
    NoMaster,
    #[error("Candidate id {id} is outside the cluster of {size} drivers.")]
    CandidateOutOfRange { id: usize, size: usize },
    #[error("No driver accepted the request to {path}.")]
    NoDriverReachable { path: &'static str },
    #[error("Driver state lock poisoned.")]
    StatePoisoned,
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
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
