//! Session state broadcast and application callbacks.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
    /// The server ended this session. Only a `SESSION_TERMINATED` response
    /// leads here.
    Terminated,
}

type TerminatedCallback = Arc<dyn Fn() + Send + Sync>;
type AuthFailureCallback = Arc<dyn Fn(&AuthError) + Send + Sync>;

/// Registry of session callbacks plus a `watch` channel of [`SessionState`].
pub struct SessionEvents {
    state: watch::Sender<SessionState>,
    on_terminated: Mutex<Vec<TerminatedCallback>>,
    on_auth_failure: Mutex<Vec<AuthFailureCallback>>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionEvents {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            state,
            on_terminated: Mutex::new(Vec::new()),
            on_auth_failure: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `next` and return the state that was replaced.
    pub fn transition(&self, next: SessionState) -> SessionState {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Session state changed");
        }
        previous
    }

    /// Register a callback for server-side session termination.
    pub fn on_session_terminated(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_terminated.lock().push(Arc::new(callback));
    }

    /// Register a callback for unrecoverable authentication failures
    /// (refresh failed, token rejected).
    pub fn on_auth_failure(&self, callback: impl Fn(&AuthError) + Send + Sync + 'static) {
        self.on_auth_failure.lock().push(Arc::new(callback));
    }

    // Callbacks run outside the lock so they may register further callbacks.

    pub(crate) fn emit_terminated(&self) {
        let callbacks = self.on_terminated.lock().clone();
        for cb in callbacks {
            cb();
        }
    }

    pub(crate) fn emit_auth_failure(&self, error: &AuthError) {
        let callbacks = self.on_auth_failure.lock().clone();
        for cb in callbacks {
            cb(error);
        }
    }
}
