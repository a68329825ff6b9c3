use regex::Regex;
use std::env;

use crate::ConfigError;

const ENV_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Interpolate environment variables in a string.
/// Replaces `${VAR_NAME}` with the value of the environment variable.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(ENV_PATTERN).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m: &String| m == var_name) {
                    missing.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}
