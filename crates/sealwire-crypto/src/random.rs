//! CSPRNG-backed helpers.
//!
//! Every byte of randomness in this crate comes from the operating system
//! generator through [`fill_random`]. Failures are reported, never papered
//! over with a weaker source.

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest byte value that maps onto the alphabet without modulo bias.
#[allow(clippy::cast_possible_truncation)]
const ID_ACCEPT_BELOW: u8 = (256 - 256 % ID_ALPHABET.len()) as u8;

/// Fill `buf` from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::RngUnavailable(e.to_string()))
}

/// Return `N` random bytes from the OS CSPRNG.
pub fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

/// Random alphanumeric identifier of `len` characters.
///
/// Uses rejection sampling so every character is uniformly distributed.
pub fn random_id(len: usize) -> Result<String, CryptoError> {
    let mut id = String::with_capacity(len);
    let mut pool = [0u8; 64];
    while id.len() < len {
        fill_random(&mut pool)?;
        for &b in &pool {
            if b < ID_ACCEPT_BELOW {
                id.push(char::from(ID_ALPHABET[usize::from(b) % ID_ALPHABET.len()]));
                if id.len() == len {
                    break;
                }
            }
        }
    }
    Ok(id)
}

/// Hex-encoded SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
