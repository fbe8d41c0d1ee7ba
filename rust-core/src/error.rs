//! Error types for the stroke sensing engine.
//!
//! Nothing in the ingestion or analysis path is an error: short history,
//! flat signals, weak periodicity and bad GPS fixes are all skipped quietly.
//! What remains is misconfiguration (rejected when a session starts), session
//! control misuse, and the I/O surfaces of config loading and replay.

use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("A recording session is already in progress")]
    AlreadyRecording,

    #[error("Stroke service has been shut down")]
    ServiceStopped,
}
