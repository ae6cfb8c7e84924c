//! # Error Types
//!
//! Custom error types for the PPK2 logger using `thiserror`.

use thiserror::Error;

/// Main error type for the PPK2 logger
#[derive(Debug, Error)]
pub enum Ppk2LoggerError {
    /// Serial port errors (open, read, write)
    #[error("Serial error: {0}")]
    Serial(String),

    /// No PPK2 was found during discovery
    #[error("No PPK2 device detected")]
    DeviceNotFound,

    /// More PPK2 ports were found than can be disambiguated
    #[error("Too many PPK2 devices detected: {0}")]
    TooManyDevices(String),

    /// PPK2 protocol errors
    #[error("PPK2 protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the PPK2 logger
pub type Result<T> = std::result::Result<T, Ppk2LoggerError>;
