//! Symmetric authenticated encryption ("secretbox") keyed by a session key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use crate::error::CryptoError;
use crate::keys::SessionKey;
use crate::random::random_array;
use crate::sealed::{NONCE_SIZE, TAG_SIZE};

/// Ciphertext and nonce produced by [`seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricCiphertext {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

fn cipher(key: &SessionKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

pub fn seal(plaintext: &[u8], key: &SessionKey) -> Result<SymmetricCiphertext, CryptoError> {
    let nonce: [u8; NONCE_SIZE] = random_array()?;
    let ciphertext = cipher(key)
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(SymmetricCiphertext { ciphertext, nonce })
}

pub fn open(ciphertext: &[u8], nonce: &[u8], key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(
            "ciphertext shorter than auth tag".into(),
        ));
    }
    cipher(key)
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}
