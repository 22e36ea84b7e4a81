//! Core error types

use thiserror::Error;

/// Core error type for Geomark
#[derive(Debug, Error)]
pub enum CoreError {
    /// Coordinate outside the valid WGS84 range
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Key material could not be decoded
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML decoding error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
