use thiserror::Error;

/// Result type used across the fishwatch core crate.
pub type Result<T> = std::result::Result<T, FishwatchError>;

/// Canonical error representation shared by the fishwatch crates.
#[derive(Debug, Error)]
pub enum FishwatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("rule store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("rule engine error: {0}")]
    Engine(String),

    #[error("{0}")]
    General(String),
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable {key}: {value}")]
    InvalidEnvVar { key: String, value: String },
}

impl From<ConfigError> for FishwatchError {
    fn from(value: ConfigError) -> Self {
        FishwatchError::Config(value.to_string())
    }
}
