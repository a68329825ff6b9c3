use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// How much of the recording the backend should process before queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingLevel {
    /// Enough to answer console and source queries
    #[default]
    Basic,
    /// Everything, including full indexing of the recording
    Full,
}

impl ProcessingLevel {
    /// Wire name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingLevel::Basic => "basic",
            ProcessingLevel::Full => "full",
        }
    }
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Human-readable duration (e.g., "200ms", "5m", "1h").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(std::time::Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
            (num, "ms")
        } else if let Some(num) = s.strip_suffix('s') {
            (num, "s")
        } else if let Some(num) = s.strip_suffix('m') {
            (num, "m")
        } else if let Some(num) = s.strip_suffix('h') {
            (num, "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            _ => std::time::Duration::from_secs(num * 3600),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let millis = self.0.as_millis();

        if millis < 1000 {
            write!(f, "{}ms", millis)
        } else if secs < 60 {
            write!(f, "{}s", secs)
        } else if secs < 3600 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}h", secs / 3600)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Hold resume operations until the first warp to the recording endpoint.
    #[serde(default = "default_true")]
    pub require_initial_warp: bool,
    /// Processing level requested before console queries.
    #[serde(default)]
    pub processing_level: ProcessingLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            require_initial_warp: true,
            processing_level: ProcessingLevel::Basic,
        }
    }
}

/// Resume-target cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeTargetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of cached targets. Resolved by `apply_defaults`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<u64>,
    /// Optional time-to-live for cached targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<HumanDuration>,
}

impl Default for ResumeTargetConfig {
    fn default() -> Self {
        ResumeTargetConfig {
            enabled: true,
            max_entries: None,
            ttl: None,
        }
    }
}

/// Breakpoint handling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointConfig {
    /// Fetch possible breakpoint positions for a source before setting one in it.
    #[serde(default = "default_true")]
    pub prefetch_positions: bool,
    /// Ignore per-source rejections when a breakpoint fans out to equivalent sources.
    #[serde(default = "default_true")]
    pub ignore_invalid_locations: bool,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        BreakpointConfig {
            prefetch_positions: true,
            ignore_invalid_locations: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level. Resolved by `apply_defaults`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub format: LogFormat,
    /// Per-module level overrides, applied in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub targets: IndexMap<String, LogLevel>,
}

/// Root configuration for a debugging session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RewindConfig {
    /// Optional name used in log output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub resume_targets: ResumeTargetConfig,
    #[serde(default)]
    pub breakpoints: BreakpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_parse() {
        assert_eq!(
            "200ms".parse::<HumanDuration>().unwrap().as_duration(),
            std::time::Duration::from_millis(200)
        );
        assert_eq!(
            "5m".parse::<HumanDuration>().unwrap().as_duration(),
            std::time::Duration::from_secs(300)
        );
        assert_eq!(
            "2h".parse::<HumanDuration>().unwrap().as_duration(),
            std::time::Duration::from_secs(7200)
        );
        assert!("soon".parse::<HumanDuration>().is_err());
        assert!("xs".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn test_human_duration_display() {
        assert_eq!(HumanDuration(std::time::Duration::from_millis(250)).to_string(), "250ms");
        assert_eq!(HumanDuration(std::time::Duration::from_secs(90)).to_string(), "1m");
    }

    #[test]
    fn test_processing_level_wire_name() {
        assert_eq!(ProcessingLevel::Basic.as_str(), "basic");
        assert_eq!(ProcessingLevel::Full.as_str(), "full");
    }
}
