//! Persisted access/refresh token pair.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::store::KeyValueStore;

pub const ACCESS_TOKEN_KEY: &str = "auth.access_token";
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";

/// Opaque bearer credentials issued by the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthTokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for AuthTokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the stored pair. Exactly one half present means an interrupted
    /// write and is reported as corrupt.
    pub async fn load(&self) -> Result<Option<AuthTokenPair>, StorageError> {
        let access = self.store.get(ACCESS_TOKEN_KEY).await?;
        let refresh = self.store.get(REFRESH_TOKEN_KEY).await?;
        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(AuthTokenPair {
                access_token,
                refresh_token,
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(StorageError::Corrupt {
                key: REFRESH_TOKEN_KEY.to_string(),
                reason: "access token stored without refresh token".to_string(),
            }),
            (None, Some(_)) => Err(StorageError::Corrupt {
                key: ACCESS_TOKEN_KEY.to_string(),
                reason: "refresh token stored without access token".to_string(),
            }),
        }
    }

    pub async fn save(&self, tokens: &AuthTokenPair) -> Result<(), StorageError> {
        self.store
            .set_many(&[
                (ACCESS_TOKEN_KEY, tokens.access_token.as_str()),
                (REFRESH_TOKEN_KEY, tokens.refresh_token.as_str()),
            ])
            .await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store
            .remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .await
    }
}
