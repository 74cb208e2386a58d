//! `SessionGateway`: authenticated, encrypted API requests.
//!
//! Every request goes through the [`SecureChannel`] on the way out and on
//! the way back. A 401 is classified by its error code:
//!
//! - `SESSION_TERMINATED`: tokens cleared, state `Terminated`, the
//!   termination callbacks fire once, no refresh.
//! - `INVALID_TOKEN` / `NO_TOKEN`: tokens cleared, state `Unauthenticated`,
//!   no refresh.
//! - anything else: single-flight refresh (see `refresh.rs`), then one replay.
//!
//! Every change of session (login, restore, logout, termination, rejected
//! auth) happens under the refresh mutex and bumps its generation, so a
//! refresh that started in an older session cannot write its tokens back.

mod refresh;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use sealwire_core::config::AuthEndpoints;

use crate::channel::SecureChannel;
use crate::envelope::{ErrorCode, TokenResponse, error_message, raw_error_code};
use crate::error::{AuthError, ClientError, StorageError};
use crate::events::{SessionEvents, SessionState};
use crate::tokens::{AuthTokenPair, TokenStore};
use crate::transport::{HttpRequest, HttpTransport};

use self::refresh::RefreshState;

/// Decrypted response to an API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// The `data` member of a `{success, data}` body, or the whole body.
    pub fn data(&self) -> &Value {
        self.body.get("data").unwrap_or(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_value(self.data().clone())
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    fn into_result(self) -> Result<Self, ClientError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ClientError::Api {
            status: self.status,
            code: raw_error_code(&self.body).map(str::to_string),
            message: error_message(&self.body).unwrap_or_else(|| format!("HTTP {}", self.status)),
        })
    }
}

fn parse_tokens(body: &Value) -> Result<AuthTokenPair, ClientError> {
    let parsed: TokenResponse = serde_json::from_value(body.clone())
        .map_err(|e| ClientError::InvalidResponse(format!("token response: {e}")))?;
    match parsed.data {
        Some(data) if parsed.success => Ok(AuthTokenPair::new(data.access_token, data.refresh_token)),
        _ => Err(ClientError::InvalidResponse(
            "token response without tokens".into(),
        )),
    }
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    channel: Arc<SecureChannel>,
    tokens: TokenStore,
    cache: RwLock<Option<AuthTokenPair>>,
    refresh: Mutex<RefreshState>,
    events: SessionEvents,
    endpoints: AuthEndpoints,
    request_timeout: Duration,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionGateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGateway")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionGateway {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        channel: Arc<SecureChannel>,
        tokens: TokenStore,
        endpoints: AuthEndpoints,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                channel,
                tokens,
                cache: RwLock::new(None),
                refresh: Mutex::new(RefreshState::default()),
                events: SessionEvents::new(),
                endpoints,
                request_timeout,
            }),
        }
    }

    pub fn channel(&self) -> &Arc<SecureChannel> {
        &self.inner.channel
    }

    pub fn events(&self) -> &SessionEvents {
        &self.inner.events
    }

    pub fn state(&self) -> SessionState {
        self.inner.events.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.events.subscribe()
    }

    pub fn on_session_terminated(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.events.on_session_terminated(callback);
    }

    pub fn on_auth_failure(&self, callback: impl Fn(&AuthError) + Send + Sync + 'static) {
        self.inner.events.on_auth_failure(callback);
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .cache
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    /// Send an API request. The handshake runs first if it has not yet run
    /// for the current epoch.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, ClientError> {
        self.inner.channel.handshake().initialize().await;

        let mut retried = false;
        loop {
            let token = self.access_token().await;
            let response = self
                .dispatch(method.clone(), path, body.clone(), token.as_deref())
                .await?;
            if response.status != 401 || self.is_auth_path(path) {
                return response.into_result();
            }

            match ErrorCode::from_body(&response.body) {
                Some(ErrorCode::SessionTerminated) => {
                    self.terminate().await;
                    return Err(AuthError::SessionTerminated.into());
                }
                Some(ErrorCode::InvalidToken) => {
                    return Err(self.reject_auth(AuthError::InvalidToken).await.into());
                }
                Some(ErrorCode::NoToken) => {
                    return Err(self.reject_auth(AuthError::NoToken).await.into());
                }
                Some(ErrorCode::Other(_)) | None => {}
            }

            if retried {
                warn!(path, "Still unauthorized after token refresh");
                return response.into_result();
            }
            retried = true;
            self.refresh_after_unauthorized(token.as_deref()).await?;
            debug!(path, "Replaying request with refreshed token");
        }
    }

    /// POST the credentials to the login endpoint and keep the returned
    /// token pair.
    pub async fn login(&self, credentials: Value) -> Result<ApiResponse, ClientError> {
        let path = self.inner.endpoints.login_path.clone();
        let response = self.request(Method::POST, &path, Some(credentials)).await?;
        let tokens = parse_tokens(&response.body)?;
        self.set_tokens(tokens).await?;
        info!("Logged in");
        Ok(response)
    }

    /// Best-effort server logout, then drop tokens and the handshake epoch.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let current = self.inner.cache.read().await.clone();
        if let Some(tokens) = current {
            let body = json!({ "refreshToken": tokens.refresh_token });
            let path = self.inner.endpoints.logout_path.clone();
            match self
                .dispatch(Method::POST, &path, Some(body), Some(&tokens.access_token))
                .await
            {
                Ok(r) if r.is_success() => debug!("Server acknowledged logout"),
                Ok(r) => warn!(status = r.status, "Server logout rejected"),
                Err(e) => warn!(error = %e, "Server logout failed"),
            }
        }

        self.end_session(SessionState::Unauthenticated).await;
        self.inner.channel.handshake().reset().await?;
        info!("Logged out");
        Ok(())
    }

    pub async fn set_tokens(&self, tokens: AuthTokenPair) -> Result<(), ClientError> {
        let mut refresh = self.inner.refresh.lock().await;
        self.inner.tokens.save(&tokens).await?;
        refresh.generation += 1;
        *self.inner.cache.write().await = Some(tokens);
        self.inner.events.transition(SessionState::Authenticated);
        Ok(())
    }

    /// Load persisted tokens. Returns whether a session was restored.
    pub async fn restore(&self) -> Result<bool, ClientError> {
        let mut refresh = self.inner.refresh.lock().await;
        match self.inner.tokens.load().await {
            Ok(Some(tokens)) => {
                refresh.generation += 1;
                *self.inner.cache.write().await = Some(tokens);
                self.inner.events.transition(SessionState::Authenticated);
                info!("Session restored from storage");
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(StorageError::Corrupt { key, reason }) => {
                warn!(key, reason, "Discarding corrupt stored tokens");
                self.inner.tokens.clear().await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_auth_path(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or_default();
        path == self.inner.endpoints.login_path || path == self.inner.endpoints.refresh_path
    }

    /// One round trip: wrap, send, unwrap. No 401 handling.
    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let wrapped = self.inner.channel.wrap_request(path, body);
        let mut request = HttpRequest::new(method, path).with_timeout(self.inner.request_timeout);
        request.headers = wrapped.headers;
        request.body = wrapped.body;
        if let Some(token) = token {
            request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        let response = self.inner.transport.send(request).await?;
        let body = self
            .inner
            .channel
            .open(response.body, wrapped.context.as_deref())?;
        Ok(ApiResponse {
            status: response.status,
            body,
        })
    }

    /// Drop the session and move to `next`. The caller holds the refresh
    /// mutex. Returns the state that was replaced.
    async fn clear_session(&self, refresh: &mut RefreshState, next: SessionState) -> SessionState {
        refresh.generation += 1;
        *self.inner.cache.write().await = None;
        if let Err(e) = self.inner.tokens.clear().await {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        self.inner.events.transition(next)
    }

    async fn end_session(&self, next: SessionState) -> SessionState {
        let mut refresh = self.inner.refresh.lock().await;
        self.clear_session(&mut refresh, next).await
    }

    /// Server-side termination. Callbacks fire only on the transition into
    /// `Terminated`, so concurrent rejections notify once.
    async fn terminate(&self) {
        let previous = self.end_session(SessionState::Terminated).await;
        self.notify_terminated(previous);
    }

    /// Clear auth after an unrecoverable rejection and hand the error back.
    async fn reject_auth(&self, error: AuthError) -> AuthError {
        let previous = self.end_session(SessionState::Unauthenticated).await;
        self.notify_auth_failure(previous, &error);
        error
    }

    fn notify_terminated(&self, previous: SessionState) {
        if previous != SessionState::Terminated {
            warn!("Session terminated by server");
            self.inner.events.emit_terminated();
        }
    }

    fn notify_auth_failure(&self, previous: SessionState, error: &AuthError) {
        if matches!(
            previous,
            SessionState::Authenticated | SessionState::Refreshing
        ) {
            warn!(error = %error, "Authentication lost");
            self.inner.events.emit_auth_failure(error);
        }
    }
}
