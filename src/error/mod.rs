mod app;
mod config;
mod distributed;
mod metrics;
mod runmode;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use distributed::DistributedError;
pub use metrics::MetricsError;
pub use runmode::RunModeError;
pub use validation::ValidationError;
