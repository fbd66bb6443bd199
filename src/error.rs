use std::io;
use thiserror::Error;

use crate::core::protocol::ParseError;

/// Unified relay error type
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed tunnel header
    #[error("Protocol parse error: {0}")]
    Protocol(#[from] ParseError),

    /// Early-data header could not be decoded
    #[error("Early data error: {0}")]
    EarlyData(String),

    /// Outbound connection error
    #[error("Network connection error: {0}")]
    Connection(String),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// DNS-over-HTTPS round-trip error
    #[error("DNS error: {0}")]
    Dns(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Other(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Dns(err.to_string())
    }
}

impl RelayError {
    /// Malformed-header errors are never retried and abort the session
    pub fn is_protocol(&self) -> bool {
        matches!(self, RelayError::Protocol(_))
    }
}
