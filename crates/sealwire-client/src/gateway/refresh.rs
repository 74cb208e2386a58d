//! Single-flight token refresh.
//!
//! The first request to see a plain 401 flips `in_flight` under the mutex
//! and spawns the refresh task; every later 401 queues a oneshot waiter
//! behind it. When the task finishes it resolves the waiters in FIFO order
//! with the new access token or the shared error. The refresh runs on its
//! own task so a cancelled caller cannot leave the flag set, and a dropped
//! waiter just misses its replay.
//!
//! The refresh records the session generation it started in. If the session
//! was ended or replaced before the call returns, its result is discarded.

use std::collections::VecDeque;

use reqwest::Method;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::envelope::{ErrorCode, RefreshRequest, error_message};
use crate::error::{AuthError, ClientError};
use crate::events::SessionState;
use crate::tokens::AuthTokenPair;

use super::{SessionGateway, parse_tokens};

type Waiter = oneshot::Sender<Result<String, AuthError>>;

#[derive(Default)]
pub(super) struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<Waiter>,
    /// Bumped on every login, restore, logout and forced sign-out.
    pub(super) generation: u64,
}

impl SessionGateway {
    /// Wait for a fresh access token after `rejected` drew a plain 401.
    ///
    /// If the cached token already differs from the rejected one, a refresh
    /// finished in the meantime and the cached token is returned directly.
    pub(super) async fn refresh_after_unauthorized(
        &self,
        rejected: Option<&str>,
    ) -> Result<String, ClientError> {
        let rx = {
            let mut state = self.inner.refresh.lock().await;
            let current = self.inner.cache.read().await.clone();
            let Some(current) = current else {
                return Err(self.stale_session_error().into());
            };
            if !state.in_flight && rejected != Some(current.access_token.as_str()) {
                debug!("Token rotated since the request was sent");
                return Ok(current.access_token);
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            if state.in_flight {
                debug!(queued = state.waiters.len(), "Refresh in flight; request queued");
            } else {
                state.in_flight = true;
                self.inner.events.transition(SessionState::Refreshing);
                let gateway = self.clone();
                let generation = state.generation;
                tokio::spawn(async move {
                    gateway.run_refresh(current.refresh_token, generation).await;
                });
            }
            rx
        };

        match rx.await {
            Ok(result) => result.map_err(ClientError::from),
            Err(_) => Err(AuthError::RefreshFailed("refresh task ended without a result".into()).into()),
        }
    }

    async fn run_refresh(self, refresh_token: String, generation: u64) {
        info!("Refreshing access token");
        let result = self.call_refresh(&refresh_token).await;

        let mut state = self.inner.refresh.lock().await;
        let mut terminated_from = None;
        let mut failed_from = None;
        let current = state.generation == generation
            && self.inner.events.state() == SessionState::Refreshing;

        let outcome = if current {
            match result {
                Ok(tokens) => Ok(self.install_refreshed(tokens).await),
                Err(AuthError::SessionTerminated) => {
                    terminated_from = Some(
                        self.clear_session(&mut state, SessionState::Terminated)
                            .await,
                    );
                    Err(AuthError::SessionTerminated)
                }
                Err(e) => {
                    failed_from = Some(
                        self.clear_session(&mut state, SessionState::Unauthenticated)
                            .await,
                    );
                    Err(e)
                }
            }
        } else {
            info!("Session changed during refresh; discarding result");
            Err(self.stale_session_error())
        };
        state.in_flight = false;
        let waiters = std::mem::take(&mut state.waiters);
        drop(state);

        if let Some(previous) = terminated_from {
            self.notify_terminated(previous);
        }
        if let (Some(previous), Err(e)) = (failed_from, &outcome) {
            self.notify_auth_failure(previous, e);
        }
        debug!(waiters = waiters.len(), "Resolving queued requests");
        for waiter in waiters {
            // Err means the caller was cancelled.
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Store refreshed tokens. The caller holds the refresh mutex.
    async fn install_refreshed(&self, tokens: AuthTokenPair) -> String {
        let access = tokens.access_token.clone();
        if let Err(e) = self.inner.tokens.save(&tokens).await {
            warn!(error = %e, "Failed to persist refreshed tokens");
        }
        *self.inner.cache.write().await = Some(tokens);
        self.inner.events.transition(SessionState::Authenticated);
        info!("Access token refreshed");
        access
    }

    fn stale_session_error(&self) -> AuthError {
        if self.inner.events.state() == SessionState::Terminated {
            AuthError::SessionTerminated
        } else {
            AuthError::NoToken
        }
    }

    /// One refresh call; never retried.
    async fn call_refresh(&self, refresh_token: &str) -> Result<AuthTokenPair, AuthError> {
        let body = serde_json::to_value(RefreshRequest { refresh_token })
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
        let path = self.inner.endpoints.refresh_path.clone();
        let response = self
            .dispatch(Method::POST, &path, Some(body), None)
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if response.status == 401
            && ErrorCode::from_body(&response.body) == Some(ErrorCode::SessionTerminated)
        {
            return Err(AuthError::SessionTerminated);
        }
        if !response.is_success() {
            let message = error_message(&response.body)
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            return Err(AuthError::RefreshFailed(message));
        }
        parse_tokens(&response.body).map_err(|e| AuthError::RefreshFailed(e.to_string()))
    }
}
