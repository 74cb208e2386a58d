//! `HandshakeCoordinator`: one key exchange per epoch, memoised.
//!
//! `initialize()` makes sure a key pair exists and then contacts the
//! handshake endpoint at most once for the current epoch. Concurrent callers
//! share the same attempt through a `OnceCell`. `reset()` swaps in a fresh
//! epoch so the next `initialize()` negotiates again.
//!
//! Writes of server-side key material and the reset share one async lock.
//! A handshake only persists while its epoch is still current, so a slow
//! attempt from before a reset cannot overwrite what a newer one stored.
//!
//! Every failure here resolves to plaintext mode: the outcome is
//! [`HandshakeOutcome::Plaintext`] and the client keeps working without
//! payload encryption.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use tokio::sync::{MutexGuard, OnceCell};
use tracing::{debug, info, warn};

use sealwire_core::config::EncryptionConfig;
use sealwire_crypto::{
    CryptoEngine, CryptoError, KeyPair, SessionKey, WirePayload, b64_encode, decode_public_key, fingerprint_of,
};

use crate::envelope::{HandshakeRequest, HandshakeResponse};
use crate::error::HandshakeError;
use crate::keystore::{KeyStore, ServerKey};
use crate::transport::{HttpRequest, HttpTransport};

/// Suffix of the endpoint that receives the sealed session key.
pub const SESSION_KEY_SUFFIX: &str = "/session-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    KeyPairReady,
    HandshakeSent,
    HandshakeComplete,
    /// Terminal for the epoch; traffic is plaintext.
    HandshakeFailed,
}

/// Key material for an encrypted epoch. Never mutated once built.
#[derive(Debug)]
pub struct EncryptionContext {
    pub key_pair: KeyPair,
    pub server_key: ServerKey,
    pub session_key: Option<SessionKey>,
}

impl EncryptionContext {
    /// Base64 client public key, as sent in `X-Client-Public-Key`.
    pub fn client_public_key_b64(&self) -> String {
        b64_encode(&self.key_pair.public_bytes())
    }
}

#[derive(Debug, Clone)]
pub enum HandshakeOutcome {
    Encrypted(Arc<EncryptionContext>),
    Plaintext(HandshakeError),
}

impl HandshakeOutcome {
    pub fn context(&self) -> Option<Arc<EncryptionContext>> {
        match self {
            Self::Encrypted(ctx) => Some(Arc::clone(ctx)),
            Self::Plaintext(_) => None,
        }
    }

    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

struct Epoch {
    outcome: OnceCell<HandshakeOutcome>,
    state: Mutex<HandshakeState>,
}

impl Epoch {
    fn new() -> Self {
        Self {
            outcome: OnceCell::new(),
            state: Mutex::new(HandshakeState::Uninitialized),
        }
    }

    fn set_state(&self, state: HandshakeState) {
        *self.state.lock() = state;
    }
}

pub struct HandshakeCoordinator {
    keystore: KeyStore,
    engine: CryptoEngine,
    transport: Arc<dyn HttpTransport>,
    config: EncryptionConfig,
    timeout: Duration,
    epoch: RwLock<Arc<Epoch>>,
    persist: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for HandshakeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeCoordinator")
            .field("state", &self.state())
            .field("handshake_path", &self.config.handshake_path)
            .finish_non_exhaustive()
    }
}

impl HandshakeCoordinator {
    pub fn new(
        keystore: KeyStore,
        engine: CryptoEngine,
        transport: Arc<dyn HttpTransport>,
        config: EncryptionConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            keystore,
            engine,
            transport,
            config,
            timeout,
            epoch: RwLock::new(Arc::new(Epoch::new())),
            persist: tokio::sync::Mutex::new(()),
        }
    }

    fn current_epoch(&self) -> Arc<Epoch> {
        Arc::clone(&self.epoch.read())
    }

    pub fn state(&self) -> HandshakeState {
        *self.current_epoch().state.lock()
    }

    /// Snapshot of the current epoch's key material, if it is encrypted.
    pub fn context(&self) -> Option<Arc<EncryptionContext>> {
        self.current_epoch()
            .outcome
            .get()
            .and_then(HandshakeOutcome::context)
    }

    pub fn is_encrypted(&self) -> bool {
        self.context().is_some()
    }

    /// Run the handshake for the current epoch, or return its cached result.
    pub async fn initialize(&self) -> HandshakeOutcome {
        let epoch = self.current_epoch();
        epoch
            .outcome
            .get_or_init(|| self.run(&epoch))
            .await
            .clone()
    }

    /// Forget the server key and session key and start a new epoch.
    /// The key pair is kept.
    pub async fn reset(&self) -> Result<(), crate::error::StorageError> {
        let _persist = self.persist.lock().await;
        *self.epoch.write() = Arc::new(Epoch::new());
        self.keystore.clear_handshake().await?;
        info!("Handshake state reset");
        Ok(())
    }

    /// Take the persistence lock for `epoch`. Fails once a reset has
    /// replaced it.
    async fn persist_lock(&self, epoch: &Epoch) -> Result<MutexGuard<'_, ()>, HandshakeError> {
        let guard = self.persist.lock().await;
        let current = std::ptr::eq(Arc::as_ptr(&self.epoch.read()), epoch);
        if !current {
            debug!("Epoch replaced during handshake; not persisting");
            return Err(HandshakeError::Superseded);
        }
        Ok(guard)
    }

    async fn run(&self, epoch: &Epoch) -> HandshakeOutcome {
        if !self.config.enabled {
            epoch.set_state(HandshakeState::HandshakeFailed);
            info!("Encryption disabled by configuration; using plaintext");
            return HandshakeOutcome::Plaintext(HandshakeError::Disabled);
        }

        match self.negotiate(epoch).await {
            Ok(ctx) => {
                epoch.set_state(HandshakeState::HandshakeComplete);
                info!(
                    client = %ctx.key_pair.fingerprint(),
                    server = %fingerprint_of(&ctx.server_key.public_key),
                    key_version = ?ctx.server_key.key_version,
                    session_key = ctx.session_key.is_some(),
                    "Handshake complete; payload encryption active"
                );
                HandshakeOutcome::Encrypted(Arc::new(ctx))
            }
            Err(e) => {
                epoch.set_state(HandshakeState::HandshakeFailed);
                warn!(error = %e, "Handshake failed; continuing in plaintext");
                HandshakeOutcome::Plaintext(e)
            }
        }
    }

    async fn negotiate(&self, epoch: &Epoch) -> Result<EncryptionContext, HandshakeError> {
        let key_pair = self.ensure_key_pair().await?;
        epoch.set_state(HandshakeState::KeyPairReady);

        let previous = self.keystore.load_server_public_key().await.unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable stored server key");
            None
        });

        let body = HandshakeRequest {
            client_public_key: b64_encode(&key_pair.public_bytes()),
            encrypted_session_key: None,
        };
        epoch.set_state(HandshakeState::HandshakeSent);
        let response = self.post(&self.config.handshake_path, &body).await?;
        if !response.is_success() {
            return Err(HandshakeError::Status(response.status));
        }

        let parsed: HandshakeResponse = serde_json::from_value(response.body)
            .map_err(|e| HandshakeError::InvalidResponse(e.to_string()))?;
        if !parsed.success {
            return Err(HandshakeError::InvalidResponse("success flag not set".into()));
        }
        let data = parsed
            .data
            .ok_or_else(|| HandshakeError::InvalidResponse("missing data".into()))?;

        if !data.encryption_enabled {
            let _persist = self.persist_lock(epoch).await?;
            self.keystore.save_encryption_enabled(false).await?;
            return Err(HandshakeError::Declined);
        }

        let server_key = ServerKey {
            public_key: decode_public_key(&data.server_public_key)
                .map_err(|e| HandshakeError::InvalidResponse(e.to_string()))?,
            key_version: data.key_version,
        };
        if let Some(prev) = previous.filter(|p| p.public_key != server_key.public_key) {
            info!(
                old = %fingerprint_of(&prev.public_key),
                new = %fingerprint_of(&server_key.public_key),
                old_version = ?prev.key_version,
                new_version = ?server_key.key_version,
                "Server key rotated"
            );
        }
        {
            let _persist = self.persist_lock(epoch).await?;
            self.keystore.save_server_public_key(&server_key).await?;
            self.keystore.save_encryption_enabled(true).await?;
        }

        let session_key = if self.config.use_session_key {
            self.negotiate_session_key(epoch, &key_pair, &server_key).await?
        } else {
            None
        };

        Ok(EncryptionContext {
            key_pair,
            server_key,
            session_key,
        })
    }

    /// Load the stored key pair or create and persist one. An unreadable
    /// stored pair is an error: silently replacing it would hide corruption.
    async fn ensure_key_pair(&self) -> Result<KeyPair, HandshakeError> {
        if let Some(pair) = self.keystore.load_key_pair().await? {
            debug!(fingerprint = %pair.fingerprint(), "Loaded key pair");
            return Ok(pair);
        }
        let pair = self.engine.generate_key_pair()?;
        self.keystore.save_key_pair(&pair).await?;
        info!(fingerprint = %pair.fingerprint(), "Generated new key pair");
        Ok(pair)
    }

    /// Seal a fresh session key for the server. Failure leaves the epoch in
    /// box-only mode; only a superseded epoch is an error.
    async fn negotiate_session_key(
        &self,
        epoch: &Epoch,
        key_pair: &KeyPair,
        server_key: &ServerKey,
    ) -> Result<Option<SessionKey>, HandshakeError> {
        match self.try_session_key(epoch, key_pair, server_key).await {
            Ok(key) => Ok(Some(key)),
            Err(HandshakeError::Superseded) => Err(HandshakeError::Superseded),
            Err(e) => {
                warn!(error = %e, "Session key negotiation failed; using box only");
                let _persist = self.persist_lock(epoch).await?;
                if let Err(e) = self.keystore.clear_session_key().await {
                    warn!(error = %e, "Failed to clear stale session key");
                }
                Ok(None)
            }
        }
    }

    async fn try_session_key(
        &self,
        epoch: &Epoch,
        key_pair: &KeyPair,
        server_key: &ServerKey,
    ) -> Result<SessionKey, HandshakeError> {
        let key = self.engine.generate_session_key()?;
        let sealed = self.engine.encrypt_asymmetric(
            key.as_bytes(),
            Some(&server_key.public_key),
            Some(key_pair),
        )?;
        let body = HandshakeRequest {
            client_public_key: b64_encode(&key_pair.public_bytes()),
            encrypted_session_key: Some(WirePayload::from(&sealed)),
        };
        let path = format!("{}{SESSION_KEY_SUFFIX}", self.config.handshake_path);
        let response = self.post(&path, &body).await?;
        if !response.is_success() {
            return Err(HandshakeError::Status(response.status));
        }
        let _persist = self.persist_lock(epoch).await?;
        self.keystore.save_session_key(&key).await?;
        Ok(key)
    }

    async fn post(
        &self,
        path: &str,
        body: &HandshakeRequest,
    ) -> Result<crate::transport::HttpResponse, HandshakeError> {
        let body = serde_json::to_value(body)
            .map_err(|e| HandshakeError::Crypto(CryptoError::Encoding(e.to_string())))?;
        let request = HttpRequest::new(Method::POST, path)
            .with_body(body)
            .with_timeout(self.timeout);
        tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| HandshakeError::Timeout)?
            .map_err(HandshakeError::from)
    }
}
