use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config YAML ({0})")]
    Parse(String, #[source] serde_yaml::Error),

    #[error("Template variables must be a YAML mapping")]
    VariablesNotMapping,

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: &'static str, message: String },
}
