use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult, ConfigError};

use super::Configuration;
use super::types::ConfigFile;

/// Loads a configuration file from the provided path or default locations.
///
/// # Errors
///
/// Returns an error when the config file cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> AppResult<Option<ConfigFile>> {
    if let Some(path) = path {
        let path = PathBuf::from(path);
        return Ok(Some(load_config_file(&path)?));
    }

    let toml_path = PathBuf::from("loadmesh.toml");
    if toml_path.exists() {
        return Ok(Some(load_config_file(&toml_path)?));
    }

    let json_path = PathBuf::from("loadmesh.json");
    if json_path.exists() {
        return Ok(Some(load_config_file(&json_path)?));
    }

    Ok(None)
}

pub(crate) fn load_config_file(path: &Path) -> AppResult<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseToml {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some("json") => serde_json::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseJson {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some(ext) => Err(AppError::config(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        })),
        None => Err(AppError::config(ConfigError::MissingExtension)),
    }
}

/// Parse an execution request posted to a driver: a configuration document
/// in JSON or TOML that must define at least one phase.
///
/// # Errors
///
/// Returns an error when the body is neither format or fails validation.
pub fn parse_execution_request(body: &str) -> Result<Configuration, ConfigError> {
    let file: ConfigFile = match serde_json::from_str(body) {
        Ok(file) => file,
        Err(json_err) => toml::from_str(body).map_err(|toml_err| {
            ConfigError::UnparseableExecutionRequest {
                json: json_err.to_string(),
                toml: toml_err.to_string(),
            }
        })?,
    };
    let configuration = Configuration::from_file(&file)?;
    if configuration.phases().is_empty() {
        return Err(ConfigError::NoPhases);
    }
    Ok(configuration)
}
