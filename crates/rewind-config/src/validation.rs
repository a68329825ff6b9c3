use regex::Regex;

use crate::types::RewindConfig;
use crate::ConfigError;

const LOG_TARGET_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$";

impl RewindConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // An enabled cache needs room for at least one target
        if self.resume_targets.enabled && self.resume_targets.max_entries == Some(0) {
            errors.push(ConfigError::InvalidConfig(
                "resume_targets.max_entries must be greater than 0 when the cache is enabled"
                    .to_string(),
            ));
        }

        if let Some(ttl) = &self.resume_targets.ttl {
            if ttl.as_duration().is_zero() {
                errors.push(ConfigError::InvalidConfig(
                    "resume_targets.ttl must be greater than 0".to_string(),
                ));
            }
        }

        // Log targets must be module paths
        match Regex::new(LOG_TARGET_PATTERN) {
            Ok(re) => {
                for target in self.logging.targets.keys() {
                    if !re.is_match(target) {
                        errors.push(ConfigError::InvalidLogTarget(target.clone()));
                    }
                }
            }
            Err(e) => errors.push(ConfigError::InvalidConfig(e.to_string())),
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
