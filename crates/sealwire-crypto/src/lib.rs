//! `sealwire` E2E Encryption Library
//!
//! Cryptographic primitives for end-to-end encryption between a client and
//! its API server, layered underneath TLS.
//!
//! ## Crypto primitives
//!
//! - **Identity**: X25519 key pair per install
//! - **Box**: X25519 ECDH → HKDF-SHA256 → XChaCha20-Poly1305, 24-byte random nonce
//! - **Secretbox**: XChaCha20-Poly1305 keyed by a 32-byte session key
//! - **Randomness**: OS CSPRNG only; failure is an error, never a fallback

pub mod encoding;
pub mod engine;
pub mod error;
pub mod keys;
pub mod random;
pub mod sealed;
pub mod secretbox;

pub use encoding::{WirePayload, b64_decode, b64_encode, decode_public_key};
pub use engine::CryptoEngine;
pub use error::CryptoError;
pub use keys::{KEY_SIZE, KeyPair, PublicKeyBytes, SessionKey, fingerprint_of};
pub use sealed::{EncryptedPayload, NONCE_SIZE};
pub use secretbox::SymmetricCiphertext;
