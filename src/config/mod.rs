//! Configuration loading and validation.
mod apply;
mod loader;
mod parse;
pub mod types;

#[cfg(test)]
mod tests;

pub use apply::{Configuration, DistributedSettings};
pub use loader::{load_config, parse_execution_request};

pub(crate) use loader::load_config_file;
pub(crate) use parse::{parse_duration_value, parse_duration_value_allow_zero};
