//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Key material required for the operation is missing.
    #[error("Crypto not ready: {0}")]
    NotReady(&'static str),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The operating system CSPRNG could not produce bytes. Fatal: there is
    /// no non-cryptographic fallback.
    #[error("Secure random number generator unavailable: {0}")]
    RngUnavailable(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}
