use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error(
        "Configuration file not found. Checked:\n\
        - HOSTFLOW_CONFIG_PATH environment variable\n\
        - current directory: hostflow.local.yaml, hostflow.yaml\n\
        - ./.hostflow/hostflow.yaml\n\
        - ~/.config/hostflow/hostflow.yaml"
    )]
    ConfigFileNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Environment variable {name} referenced in configuration is not set")]
    MissingEnvVar { name: String },

    #[error("Unterminated ${{...}} reference in configuration")]
    UnterminatedReference,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
