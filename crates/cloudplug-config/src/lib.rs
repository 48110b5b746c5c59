pub mod error;
pub mod logging;
pub mod settings;

pub use error::*;
pub use logging::init_tracing;
pub use settings::{
    CloudplugConfig, ConnectionConfig, LoggingConfig, PollOverride, Provider, RegistryConfig,
};

use std::path::PathBuf;

pub const ENV_CONFIG_PATH: &str = "CLOUDPLUG_CONFIG_PATH";

const CANDIDATES: [&str; 2] = ["cloudplug.local.yaml", "cloudplug.yaml"];

/// cloudplug's config directory, created if missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cloudplug");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Finds the cloudplug config file.
///
/// Search order:
/// 1. `CLOUDPLUG_CONFIG_PATH`
/// 2. current directory: cloudplug.local.yaml, cloudplug.yaml
/// 3. `./.cloudplug/`, same order
/// 4. `~/.config/cloudplug/cloudplug.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", ENV_CONFIG_PATH);
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".cloudplug");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("cloudplug").join("cloudplug.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Finds, parses and validates the config file, then applies environment
/// overrides.
pub fn load_config() -> Result<CloudplugConfig> {
    CloudplugConfig::load(&find_config_file()?)
}
