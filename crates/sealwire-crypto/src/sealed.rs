//! Asymmetric authenticated encryption ("box").
//!
//! X25519 ECDH between our secret and the peer's public key, HKDF-SHA256 to a
//! 32-byte key, then XChaCha20-Poly1305 with a fresh 24-byte random nonce per
//! message. The 192-bit nonce makes random draws safe: there is no counter
//! to persist and nothing the caller can supply.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::PublicKey;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKeyBytes};
use crate::random::random_array;

/// HKDF info string for box key derivation.
const HKDF_INFO: &[u8] = b"sealwire-e2ee-box-v1";

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"sealwire-e2ee-hkdf-salt-v1";

/// Nonce size for XChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Output of a box encryption: everything the recipient needs besides its
/// own secret key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// XChaCha20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    /// 24-byte nonce used for this encryption.
    pub nonce: [u8; NONCE_SIZE],
    /// Public key of the sender, needed by the recipient for ECDH.
    pub sender_public_key: PublicKeyBytes,
}

/// Derive the box cipher for a (our secret, their public) pair.
fn box_cipher(own: &KeyPair, peer_public: &PublicKeyBytes) -> Result<XChaCha20Poly1305, CryptoError> {
    let shared = own.secret().diffie_hellman(&PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(CryptoError::KeyDerivationFailed(
            "peer public key is a low-order point".into(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.as_bytes());
    let mut key_bytes = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    key_bytes.zeroize();
    Ok(cipher)
}

/// Encrypt `plaintext` for `recipient` using our key pair.
pub fn seal(
    plaintext: &[u8],
    recipient: &PublicKeyBytes,
    own: &KeyPair,
) -> Result<EncryptedPayload, CryptoError> {
    let cipher = box_cipher(own, recipient)?;
    let nonce: [u8; NONCE_SIZE] = random_array()?;

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedPayload {
        ciphertext,
        nonce,
        sender_public_key: own.public_bytes(),
    })
}

/// Decrypt a payload addressed to us.
pub fn open(payload: &EncryptedPayload, own: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    if payload.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "ciphertext shorter than auth tag ({} bytes)",
            payload.ciphertext.len()
        )));
    }
    let cipher = box_cipher(own, &payload.sender_public_key)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(XNonce::from_slice(&payload.nonce), payload.ciphertext.as_slice())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}
