//! Base64 wire encodings for keys and encrypted payloads.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::keys::{PublicKeyBytes, public_key_from_slice};
use crate::sealed::{EncryptedPayload, NONCE_SIZE};

pub fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn b64_decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(input.trim())
        .map_err(|e| CryptoError::Encoding(format!("invalid base64: {e}")))
}

/// Decode a base64 X25519 public key.
pub fn decode_public_key(input: &str) -> Result<PublicKeyBytes, CryptoError> {
    public_key_from_slice(&b64_decode(input)?)
}

/// JSON shape of an [`EncryptedPayload`]:
/// `{"ciphertext": b64, "nonce": b64, "publicKey": b64}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    pub ciphertext: String,
    pub nonce: String,
    pub public_key: String,
}

impl From<&EncryptedPayload> for WirePayload {
    fn from(p: &EncryptedPayload) -> Self {
        Self {
            ciphertext: b64_encode(&p.ciphertext),
            nonce: b64_encode(&p.nonce),
            public_key: b64_encode(&p.sender_public_key),
        }
    }
}

impl TryFrom<&WirePayload> for EncryptedPayload {
    type Error = CryptoError;

    fn try_from(w: &WirePayload) -> Result<Self, Self::Error> {
        let nonce_bytes = b64_decode(&w.nonce)?;
        let nonce: [u8; NONCE_SIZE] =
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: nonce_bytes.len(),
                })?;
        Ok(Self {
            ciphertext: b64_decode(&w.ciphertext)?,
            nonce,
            sender_public_key: decode_public_key(&w.public_key)?,
        })
    }
}
