//! tracing subscriber setup

use crate::error::{ConfigError, Result};
use crate::settings::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, the configured level otherwise.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global fmt subscriber. With a log file configured, output
/// is appended there without ANSI colors; otherwise it goes to stderr.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config);
    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_writer(Mutex::new(file))
                .with_env_filter(filter)
                .with_ansi(false)
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init(),
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_configured_level_without_rust_log() {
        temp_env::with_var_unset("RUST_LOG", || {
            let config = LoggingConfig {
                level: "debug".into(),
                file: None,
            };
            assert_eq!(env_filter(&config).max_level_hint(), Some(LevelFilter::DEBUG));
        });
    }

    #[test]
    fn test_rust_log_wins() {
        temp_env::with_var("RUST_LOG", Some("warn"), || {
            assert_eq!(
                env_filter(&LoggingConfig::default()).max_level_hint(),
                Some(LevelFilter::WARN)
            );
        });
    }

    #[test]
    fn test_file_logging_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloudplug.log");
        let config = LoggingConfig {
            level: "info".into(),
            file: Some(path.clone()),
        };
        // another test may already own the global subscriber
        let _ = init_tracing(&config);
        assert!(path.exists());
    }
}
