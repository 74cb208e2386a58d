//! Client error taxonomy.
//!
//! Every error here is `Clone`: a single refresh failure is delivered to all
//! requests that were queued behind it.

use sealwire_crypto::CryptoError;

/// Read/write failure on persisted key material or tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored value exists but cannot be trusted (partial write, bad encoding).
    #[error("Corrupt stored value for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<sealwire_core::db::DatabaseError> for StorageError {
    fn from(e: sealwire_core::db::DatabaseError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Failure of the HTTP transport itself (no response received).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why the handshake did not produce an encrypted session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Encryption disabled by configuration")]
    Disabled,

    #[error("Server declined encryption")]
    Declined,

    #[error("Handshake timed out")]
    Timeout,

    #[error("Handshake network error: {0}")]
    Network(String),

    #[error("Handshake rejected with HTTP {0}")]
    Status(u16),

    #[error("Invalid handshake response: {0}")]
    InvalidResponse(String),

    #[error("Key storage failed during handshake: {0}")]
    Storage(#[from] StorageError),

    #[error("Key generation failed during handshake: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Handshake superseded by a reset")]
    Superseded,
}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => Self::Timeout,
            other => Self::Network(other.to_string()),
        }
    }
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The server ended this session (another device signed in).
    #[error("Session terminated by server")]
    SessionTerminated,

    #[error("Access token rejected by server")]
    InvalidToken,

    #[error("No authentication token available")]
    NoToken,
}

/// Errors raised by a push notification provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("Push provider unavailable: {0}")]
    Unavailable(String),

    #[error("Push permission denied")]
    PermissionDenied,
}

/// Umbrella error returned by the gateway and the client facade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sealwire_core::Error> for ClientError {
    fn from(e: sealwire_core::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl ClientError {
    /// Whether this error should force the user back to a login screen.
    pub const fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Auth(
                AuthError::SessionTerminated
                    | AuthError::RefreshFailed(_)
                    | AuthError::InvalidToken
                    | AuthError::NoToken
            )
        )
    }
}
