//! `KeyStore`: persistence of the client key pair, the server's public key,
//! the optional session key and the negotiated encryption flag.
//!
//! Each logical record lives under a single storage key so it is replaced
//! as a whole. Anything that fails to decode is reported as
//! [`StorageError::Corrupt`]; stale or partial key material is never handed
//! out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sealwire_crypto::{KeyPair, PublicKeyBytes, SessionKey, b64_decode, b64_encode, decode_public_key};

use crate::error::StorageError;
use crate::store::KeyValueStore;

pub const KEY_PAIR_KEY: &str = "e2ee.key_pair";
pub const SERVER_KEY_KEY: &str = "e2ee.server_public_key";
pub const SESSION_KEY_KEY: &str = "e2ee.session_key";
pub const ENCRYPTION_ENABLED_KEY: &str = "e2ee.encryption_enabled";

/// The server's public key for one server epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerKey {
    pub public_key: PublicKeyBytes,
    /// Rotation counter announced by the server, if it sends one.
    pub key_version: Option<u64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKeyPair {
    secret_key: String,
    public_key: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredServerKey {
    public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_version: Option<u64>,
}

fn corrupt(key: &str, reason: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn to_json<T: Serialize>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| corrupt(key, e))
}

#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore").finish_non_exhaustive()
    }
}

impl KeyStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load_key_pair(&self) -> Result<Option<KeyPair>, StorageError> {
        let Some(raw) = self.store.get(KEY_PAIR_KEY).await? else {
            return Ok(None);
        };
        let stored: StoredKeyPair =
            serde_json::from_str(&raw).map_err(|e| corrupt(KEY_PAIR_KEY, e))?;
        let secret = b64_decode(&stored.secret_key).map_err(|e| corrupt(KEY_PAIR_KEY, e))?;
        let public = b64_decode(&stored.public_key).map_err(|e| corrupt(KEY_PAIR_KEY, e))?;
        let pair =
            KeyPair::from_stored_parts(&secret, &public).map_err(|e| corrupt(KEY_PAIR_KEY, e))?;
        Ok(Some(pair))
    }

    pub async fn save_key_pair(&self, pair: &KeyPair) -> Result<(), StorageError> {
        let stored = StoredKeyPair {
            secret_key: b64_encode(&pair.secret_bytes()),
            public_key: b64_encode(&pair.public_bytes()),
        };
        self.store
            .set(KEY_PAIR_KEY, &to_json(KEY_PAIR_KEY, &stored)?)
            .await?;
        debug!(fingerprint = %pair.fingerprint(), "Key pair persisted");
        Ok(())
    }

    pub async fn load_server_public_key(&self) -> Result<Option<ServerKey>, StorageError> {
        let Some(raw) = self.store.get(SERVER_KEY_KEY).await? else {
            return Ok(None);
        };
        let stored: StoredServerKey =
            serde_json::from_str(&raw).map_err(|e| corrupt(SERVER_KEY_KEY, e))?;
        let public_key =
            decode_public_key(&stored.public_key).map_err(|e| corrupt(SERVER_KEY_KEY, e))?;
        Ok(Some(ServerKey {
            public_key,
            key_version: stored.key_version,
        }))
    }

    /// Replace the stored server key. Key and version are one record, so a
    /// rotation can never leave a new key paired with an old version.
    pub async fn save_server_public_key(&self, key: &ServerKey) -> Result<(), StorageError> {
        let stored = StoredServerKey {
            public_key: b64_encode(&key.public_key),
            key_version: key.key_version,
        };
        self.store
            .set(SERVER_KEY_KEY, &to_json(SERVER_KEY_KEY, &stored)?)
            .await
    }

    pub async fn load_session_key(&self) -> Result<Option<SessionKey>, StorageError> {
        let Some(raw) = self.store.get(SESSION_KEY_KEY).await? else {
            return Ok(None);
        };
        let bytes = b64_decode(&raw).map_err(|e| corrupt(SESSION_KEY_KEY, e))?;
        SessionKey::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| corrupt(SESSION_KEY_KEY, e))
    }

    pub async fn save_session_key(&self, key: &SessionKey) -> Result<(), StorageError> {
        self.store
            .set(SESSION_KEY_KEY, &b64_encode(key.as_bytes()))
            .await
    }

    pub async fn clear_session_key(&self) -> Result<(), StorageError> {
        self.store.remove(SESSION_KEY_KEY).await
    }

    pub async fn load_encryption_enabled(&self) -> Result<Option<bool>, StorageError> {
        match self.store.get(ENCRYPTION_ENABLED_KEY).await?.as_deref() {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(corrupt(ENCRYPTION_ENABLED_KEY, format!("unexpected value {other:?}"))),
        }
    }

    pub async fn save_encryption_enabled(&self, enabled: bool) -> Result<(), StorageError> {
        self.store
            .set(ENCRYPTION_ENABLED_KEY, if enabled { "true" } else { "false" })
            .await
    }

    /// Drop the handshake-scoped state: server key, session key and flag.
    /// The key pair survives.
    pub async fn clear_handshake(&self) -> Result<(), StorageError> {
        self.store
            .remove_many(&[SERVER_KEY_KEY, SESSION_KEY_KEY, ENCRYPTION_ENABLED_KEY])
            .await
    }

    /// Remove every record this store owns, key pair included.
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        self.store
            .remove_many(&[
                KEY_PAIR_KEY,
                SERVER_KEY_KEY,
                SESSION_KEY_KEY,
                ENCRYPTION_ENABLED_KEY,
            ])
            .await
    }
}
