//! Error types for the latchkey core

use thiserror::Error;

/// Result type alias for latchkey operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by storage adapters, sealing and configuration
///
/// The lockout and biometric operations never surface these to their
/// callers; they log them and fall back to a safe default.
#[derive(Debug, Error)]
pub enum Error {
    /// Persistence backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Sealed data could not be opened
    #[error("Decryption failed - wrong device key or corrupted data")]
    DecryptionFailed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
