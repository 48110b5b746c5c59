use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    ConfigDirNotFound,

    #[error(
        "config file not found. Looked in:\n\
        - current directory: cloudplug.local.yaml, cloudplug.yaml\n\
        - ./.cloudplug/ directory\n\
        - ~/.config/cloudplug/cloudplug.yaml\n\
        Set CLOUDPLUG_CONFIG_PATH to point at a file directly"
    )]
    ConfigFileNotFound,

    #[error("connection '{0}' is not configured")]
    UnknownConnection(String),

    #[error("connection '{name}': {message}")]
    InvalidConnection { name: String, message: String },

    #[error("failed to install log subscriber: {0}")]
    Logging(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
