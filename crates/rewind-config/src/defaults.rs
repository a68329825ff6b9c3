use crate::types::{LogLevel, RewindConfig};

/// Resume-target cache size used when none is configured.
pub const DEFAULT_MAX_RESUME_TARGETS: u64 = 10_000;

impl RewindConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        // 1. Cache capacity follows the enabled flag
        let targets = &mut self.resume_targets;
        if !targets.enabled {
            targets.max_entries = Some(0);
        } else if targets.max_entries.is_none() {
            targets.max_entries = Some(DEFAULT_MAX_RESUME_TARGETS);
        }

        // 2. Global log level
        if self.logging.level.is_none() {
            self.logging.level = Some(LogLevel::Info);
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> RewindConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResumeTargetConfig;

    #[test]
    fn test_default_cache_capacity() {
        let config = RewindConfig::default().effective();
        assert_eq!(
            config.resume_targets.max_entries,
            Some(DEFAULT_MAX_RESUME_TARGETS)
        );
        assert_eq!(config.logging.level, Some(LogLevel::Info));
    }

    #[test]
    fn test_disabled_cache_has_no_capacity() {
        let mut config = RewindConfig {
            resume_targets: ResumeTargetConfig {
                enabled: false,
                max_entries: Some(50),
                ttl: None,
            },
            ..Default::default()
        };
        config.apply_defaults();
        assert_eq!(config.resume_targets.max_entries, Some(0));
    }

    #[test]
    fn test_explicit_values_kept() {
        let mut config = RewindConfig::default();
        config.resume_targets.max_entries = Some(64);
        config.logging.level = Some(LogLevel::Trace);
        config.apply_defaults();
        assert_eq!(config.resume_targets.max_entries, Some(64));
        assert_eq!(config.logging.level, Some(LogLevel::Trace));
    }
}
