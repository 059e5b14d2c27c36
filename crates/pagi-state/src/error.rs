//! State-layer error type.

use thiserror::Error;

/// Error from the backing store, snapshot capture, or configuration loading.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}
