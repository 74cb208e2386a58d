//! `CryptoEngine`: the pure transform surface used by the client.
//!
//! Stateless. Key material is borrowed per call; `Option` arguments let
//! callers hand over whatever they currently hold and get
//! [`CryptoError::NotReady`] instead of a panic when something is missing.

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKeyBytes, SessionKey};
use crate::random;
use crate::sealed::{self, EncryptedPayload};
use crate::secretbox::{self, SymmetricCiphertext};

#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoEngine;

impl CryptoEngine {
    pub const fn new() -> Self {
        Self
    }

    pub fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        KeyPair::generate()
    }

    pub fn generate_session_key(&self) -> Result<SessionKey, CryptoError> {
        SessionKey::generate()
    }

    /// Box-encrypt `plaintext` for `recipient`.
    pub fn encrypt_asymmetric(
        &self,
        plaintext: &[u8],
        recipient: Option<&PublicKeyBytes>,
        own: Option<&KeyPair>,
    ) -> Result<EncryptedPayload, CryptoError> {
        let recipient = recipient.ok_or(CryptoError::NotReady("recipient public key"))?;
        let own = own.ok_or(CryptoError::NotReady("own key pair"))?;
        sealed::seal(plaintext, recipient, own)
    }

    /// Open a box addressed to `own`. Any authentication failure is an error;
    /// partial plaintext is never returned.
    pub fn decrypt_asymmetric(
        &self,
        payload: &EncryptedPayload,
        own: Option<&KeyPair>,
    ) -> Result<Vec<u8>, CryptoError> {
        let own = own.ok_or(CryptoError::NotReady("own key pair"))?;
        sealed::open(payload, own)
    }

    pub fn encrypt_symmetric(
        &self,
        plaintext: &[u8],
        key: Option<&SessionKey>,
    ) -> Result<SymmetricCiphertext, CryptoError> {
        let key = key.ok_or(CryptoError::NotReady("session key"))?;
        secretbox::seal(plaintext, key)
    }

    pub fn decrypt_symmetric(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        key: Option<&SessionKey>,
    ) -> Result<Vec<u8>, CryptoError> {
        let key = key.ok_or(CryptoError::NotReady("session key"))?;
        secretbox::open(ciphertext, nonce, key)
    }

    /// Hex SHA-256 digest.
    pub fn hash(&self, data: &[u8]) -> String {
        random::sha256_hex(data)
    }

    /// CSPRNG alphanumeric identifier.
    pub fn random_id(&self, len: usize) -> Result<String, CryptoError> {
        random::random_id(len)
    }
}
