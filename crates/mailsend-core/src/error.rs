//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Token refresh or provider error.
    #[error("OAuth error: {0}")]
    OAuth(#[from] mailsend_oauth::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A stored token record exists but cannot be read back.
    #[error("Corrupt token record for '{account_id}': {reason}")]
    CorruptRecord {
        /// Account whose record is unreadable.
        account_id: String,
        /// What went wrong.
        reason: String,
    },

    /// Account identifier cannot be used as a storage key.
    #[error("Invalid account id '{0}'")]
    InvalidAccountId(String),

    /// Account not registered.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// A concurrent refresh of the same account, which this call waited on, failed.
    #[error("Concurrent refresh of '{0}' failed")]
    RefreshFailedElsewhere(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if retrying the refresh cannot help without re-authorization.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::OAuth(e) => e.is_terminal(),
            Self::AccountNotFound(_) | Self::InvalidAccountId(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
