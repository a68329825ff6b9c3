mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::DEFAULT_MAX_RESUME_TARGETS;
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Invalid log target '{0}': expected a module path such as 'rewind_thread::thread'")]
    InvalidLogTarget(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RewindConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: RewindConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
