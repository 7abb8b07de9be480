//! Error types for GameBridge

use thiserror::Error;
use uuid::Uuid;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener could not be bound
    #[error("Bind failed: {0}")]
    Bind(std::io::Error),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Handshake failed or was refused
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<bincode_next::error::EncodeError> for BridgeError {
    fn from(err: bincode_next::error::EncodeError) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<bincode_next::error::DecodeError> for BridgeError {
    fn from(err: bincode_next::error::DecodeError) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}
