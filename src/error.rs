// src/error.rs
use std::io;
use thiserror::Error;

/// Result alias used throughout the beacon library
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Custom Error type for the beacon library
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Metric error: {0}")]
    Metric(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Version error: {0}")]
    Version(String),

    #[error("Other error: {0}")]
    Other(String),
}
