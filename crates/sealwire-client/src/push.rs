//! Push notification collaborator.
//!
//! Delivery is out of scope; the client only needs a device token to
//! register after login and a way to hear about token changes. Platforms
//! without push use [`NoopPushProvider`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PushError;

pub type TokenRefreshHook = Box<dyn Fn(String) + Send + Sync>;
pub type MessageHook = Box<dyn Fn(Value) + Send + Sync>;

#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Request permissions and connect to the platform service.
    async fn initialize(&self) -> Result<(), PushError>;

    /// Current device token, if the platform issued one.
    async fn token(&self) -> Option<String>;

    /// Called with the new token whenever the platform rotates it.
    fn on_token_refresh(&self, hook: TokenRefreshHook);

    /// Called with each incoming message payload.
    fn on_message(&self, hook: MessageHook);
}

/// Provider for platforms without push support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPushProvider;

#[async_trait]
impl PushProvider for NoopPushProvider {
    async fn initialize(&self) -> Result<(), PushError> {
        Ok(())
    }

    async fn token(&self) -> Option<String> {
        None
    }

    fn on_token_refresh(&self, _hook: TokenRefreshHook) {}

    fn on_message(&self, _hook: MessageHook) {}
}
