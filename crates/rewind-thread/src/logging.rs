//! `tracing` subscriber setup driven by [`LoggingConfig`].

use rewind_config::{LogFormat, LogLevel, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Filter directives for `config`: the global level followed by the
/// per-module overrides, in declaration order.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let level = config.level.unwrap_or(LogLevel::Info);
    std::iter::once(level.as_str().to_string())
        .chain(
            config
                .targets
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        )
        .collect::<Vec<_>>()
        .join(",")
}

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over the
/// configured directives.
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(filter_directives(&LoggingConfig::default()), "info");
    }

    #[test]
    fn test_directives_keep_target_order() {
        let mut config = LoggingConfig {
            level: Some(LogLevel::Warn),
            ..Default::default()
        };
        config
            .targets
            .insert("rewind_thread::thread".to_string(), LogLevel::Trace);
        config.targets.insert("rewind_core".to_string(), LogLevel::Debug);
        assert_eq!(
            filter_directives(&config),
            "warn,rewind_thread::thread=trace,rewind_core=debug"
        );
        assert!(EnvFilter::try_new(filter_directives(&config)).is_ok());
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
