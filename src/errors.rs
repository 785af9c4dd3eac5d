// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The start request is missing a required field or has a malformed one.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A file referenced by the request does not exist.
    #[error("Input not found: {0}")]
    MissingInput(String),

    /// The worker process (or the persistent service) could not be launched.
    #[error("Failed to spawn backend: {0}")]
    Spawn(String),

    /// The control plane has already shut down.
    #[error("Control plane is shut down")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ControlError>;
