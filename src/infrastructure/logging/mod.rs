// Logging module - Logging infrastructure
use crate::domain::config::GlobalConfig;
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system
///
/// `RUST_LOG` overrides the default filter. Calling this again once a
/// subscriber is installed does nothing.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_with("replboard=info,warn")
}

/// Initialize logging at the configured `log_level` for this crate.
pub fn init_logging_from(config: &GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    init_logging_with(&crate_filter(&config.log_level))
}

fn crate_filter(log_level: &str) -> String {
    format!("replboard={},warn", log_level.trim())
}

/// Initialize logging with `default_filter` when `RUST_LOG` is unset.
pub fn init_logging_with(default_filter: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))?;

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("ReplBoard logging system initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_init() {
        assert!(init_logging().is_ok());
        // Second call is a no-op
        assert!(init_logging().is_ok());
    }

    #[test]
    fn test_filter_from_config_level() {
        let mut config = GlobalConfig::default();
        assert_eq!(crate_filter(&config.log_level), "replboard=info,warn");

        config.log_level = "debug".to_string();
        assert_eq!(crate_filter(&config.log_level), "replboard=debug,warn");
        assert!(init_logging_from(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let config = GlobalConfig {
            log_level: "loud".to_string(),
            ..GlobalConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(init_logging_from(&config).is_err());
        }
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        if std::env::var("RUST_LOG").is_err() {
            assert!(init_logging_with("replboard=notalevel").is_err());
        }
    }
}
