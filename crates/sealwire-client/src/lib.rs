//! `sealwire` API Client
//!
//! Application-layer encryption for JSON APIs, on top of TLS:
//! - One handshake per session epoch, shared by all concurrent callers
//! - Transparent request/response sealing with a plaintext allow-list
//! - Fail-open handshake, fail-closed decryption
//! - Single-flight access token refresh with FIFO replay
//! - Server-side session termination and auth failure callbacks

pub mod channel;
pub mod client;
pub mod envelope;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handshake;
pub mod keystore;
pub mod push;
pub mod store;
pub mod tokens;
pub mod transport;

#[cfg(test)]
mod testing;

pub use channel::SecureChannel;
pub use client::{SecureClient, SecureClientBuilder};
pub use error::{AuthError, ClientError, HandshakeError, PushError, StorageError, TransportError};
pub use events::SessionState;
pub use gateway::{ApiResponse, SessionGateway};
pub use handshake::{EncryptionContext, HandshakeCoordinator, HandshakeOutcome, HandshakeState};
pub use keystore::{KeyStore, ServerKey};
pub use push::{NoopPushProvider, PushProvider};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use tokens::{AuthTokenPair, TokenStore};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
