//! `SecureClient`: composition root.
//!
//! Wires the key store, token store, crypto engine, handshake coordinator,
//! secure channel and session gateway from a [`ClientConfig`]. Storage,
//! transport and push are injected; the builder falls back to `SQLite`,
//! reqwest and a no-op push provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sealwire_core::ClientConfig;
use sealwire_crypto::CryptoEngine;

use crate::channel::SecureChannel;
use crate::error::{AuthError, ClientError, PushError};
use crate::events::SessionState;
use crate::gateway::{ApiResponse, SessionGateway};
use crate::handshake::{HandshakeCoordinator, HandshakeOutcome};
use crate::keystore::KeyStore;
use crate::push::{NoopPushProvider, PushProvider};
use crate::store::{KeyValueStore, SqliteStore};
use crate::tokens::TokenStore;
use crate::transport::{HttpTransport, ReqwestTransport};

#[must_use]
pub struct SecureClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    push: Option<Arc<dyn PushProvider>>,
}

impl SecureClientBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn push_provider(mut self, push: Arc<dyn PushProvider>) -> Self {
        self.push = Some(push);
        self
    }

    pub async fn build(self) -> Result<SecureClient, ClientError> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => {
                let path = config.resolved_database_path().ok_or_else(|| {
                    ClientError::Config("no database path configured or derivable".into())
                })?;
                Arc::new(SqliteStore::open(&path).await?) as Arc<dyn KeyValueStore>
            }
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                &config.api.base_url,
                config.api.request_timeout(),
            )?) as Arc<dyn HttpTransport>,
        };
        let push = self
            .push
            .unwrap_or_else(|| Arc::new(NoopPushProvider) as Arc<dyn PushProvider>);

        let engine = CryptoEngine::new();
        let keystore = KeyStore::new(Arc::clone(&store));
        let handshake = Arc::new(HandshakeCoordinator::new(
            keystore.clone(),
            engine,
            Arc::clone(&transport),
            config.encryption.clone(),
            config.api.handshake_timeout(),
        ));
        let channel = Arc::new(SecureChannel::new(
            Arc::clone(&handshake),
            engine,
            config.encryption.plaintext_paths.clone(),
        ));
        let gateway = SessionGateway::new(
            transport,
            channel,
            TokenStore::new(store),
            config.auth.clone(),
            config.api.request_timeout(),
        );

        Ok(SecureClient {
            config,
            engine,
            keystore,
            handshake,
            gateway,
            push,
            push_ready: AtomicBool::new(false),
        })
    }
}

pub struct SecureClient {
    config: ClientConfig,
    engine: CryptoEngine,
    keystore: KeyStore,
    handshake: Arc<HandshakeCoordinator>,
    gateway: SessionGateway,
    push: Arc<dyn PushProvider>,
    /// Set once the push provider initialised and the refresh hook is in.
    push_ready: AtomicBool,
}

impl std::fmt::Debug for SecureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureClient")
            .field("base_url", &self.config.api.base_url)
            .field("handshake", &self.handshake.state())
            .field("session", &self.gateway.state())
            .finish_non_exhaustive()
    }
}

impl SecureClient {
    pub fn builder(config: ClientConfig) -> SecureClientBuilder {
        SecureClientBuilder {
            config,
            store: None,
            transport: None,
            push: None,
        }
    }

    /// Restore any stored session, run the handshake and start push.
    pub async fn initialize(&self) -> Result<HandshakeOutcome, ClientError> {
        let restored = self.gateway.restore().await?;
        let outcome = self.handshake.initialize().await;

        match self.push.initialize().await {
            Ok(()) => self.hook_push_refresh(),
            Err(PushError::PermissionDenied) => info!("Push permission denied; not registering"),
            Err(e) => warn!(error = %e, "Push provider unavailable"),
        }
        if restored {
            self.register_push_token().await;
        }
        info!(
            encrypted = outcome.is_encrypted(),
            session = ?self.gateway.state(),
            "Client initialised"
        );
        Ok(outcome)
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, ClientError> {
        self.gateway.request(method, path, body).await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse, ClientError> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Log in, then register the push token (best-effort).
    pub async fn login(&self, credentials: Value) -> Result<ApiResponse, ClientError> {
        let response = self.gateway.login(credentials).await?;
        self.register_push_token().await;
        Ok(response)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.gateway.logout().await
    }

    /// Drop every key, including the key pair. The next request performs a
    /// fresh handshake with a new identity.
    pub async fn reset_keys(&self) -> Result<(), ClientError> {
        self.handshake.reset().await?;
        self.keystore.clear_all().await?;
        info!("All key material removed");
        Ok(())
    }

    pub fn should_encrypt(&self, path: &str) -> bool {
        self.gateway.channel().should_encrypt(path)
    }

    pub fn state(&self) -> SessionState {
        self.gateway.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.gateway.subscribe_state()
    }

    pub fn on_session_terminated(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.gateway.on_session_terminated(callback);
    }

    pub fn on_auth_failure(&self, callback: impl Fn(&AuthError) + Send + Sync + 'static) {
        self.gateway.on_auth_failure(callback);
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub const fn engine(&self) -> &CryptoEngine {
        &self.engine
    }

    pub const fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    pub const fn handshake(&self) -> &Arc<HandshakeCoordinator> {
        &self.handshake
    }

    pub const fn gateway(&self) -> &SessionGateway {
        &self.gateway
    }

    async fn register_push_token(&self) {
        if !self.push_ready.load(Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.push.token().await {
            register_device(&self.gateway, &self.config.auth.push_register_path, token).await;
        }
    }

    fn hook_push_refresh(&self) {
        if self.push_ready.swap(true, Ordering::SeqCst) {
            return;
        }
        let gateway = self.gateway.clone();
        let path = self.config.auth.push_register_path.clone();
        self.push.on_token_refresh(Box::new(move |token| {
            if gateway.state() != SessionState::Authenticated {
                return;
            }
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                warn!("Push token rotated outside a runtime; not registered");
                return;
            };
            let gateway = gateway.clone();
            let path = path.clone();
            handle.spawn(async move { register_device(&gateway, &path, token).await });
        }));
    }
}

async fn register_device(gateway: &SessionGateway, path: &str, token: String) {
    let body = json!({ "token": token, "platform": std::env::consts::OS });
    match gateway.request(Method::POST, path, Some(body)).await {
        Ok(_) => debug!("Push token registered"),
        Err(e) => warn!(error = %e, "Push token registration failed"),
    }
}
