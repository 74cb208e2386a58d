//! `SecureChannel`: per-request encryption policy.
//!
//! Outbound is fail-open: if sealing a body fails the request goes out in
//! plaintext. Inbound is fail-closed: an encrypted response that cannot be
//! opened is an error, never ciphertext handed back as data.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use sealwire_crypto::{
    CryptoEngine, CryptoError, EncryptedPayload, WirePayload, b64_decode, b64_encode,
};

use crate::envelope::{EncryptedEnvelope, Scheme, is_encrypted};
use crate::handshake::{EncryptionContext, HandshakeCoordinator};

pub const CLIENT_PUBLIC_KEY_HEADER: &str = "X-Client-Public-Key";

/// Request body and headers after the encryption policy ran.
#[derive(Debug, Clone)]
pub struct WrappedRequest {
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Key material the request was wrapped with; the matching response must
    /// be opened with the same snapshot.
    pub context: Option<Arc<EncryptionContext>>,
}

pub struct SecureChannel {
    handshake: Arc<HandshakeCoordinator>,
    engine: CryptoEngine,
    plaintext_paths: Vec<String>,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("plaintext_paths", &self.plaintext_paths)
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    pub fn new(
        handshake: Arc<HandshakeCoordinator>,
        engine: CryptoEngine,
        plaintext_paths: Vec<String>,
    ) -> Self {
        Self {
            handshake,
            engine,
            plaintext_paths,
        }
    }

    pub const fn handshake(&self) -> &Arc<HandshakeCoordinator> {
        &self.handshake
    }

    /// True iff the handshake completed and `path` is not allow-listed.
    pub fn should_encrypt(&self, path: &str) -> bool {
        self.handshake.is_encrypted() && !self.is_plaintext_path(path)
    }

    /// Prefix match on whole path segments, ignoring query and fragment.
    /// `/payments` covers `/payments` and `/payments/x`, not `/paymentsx`.
    pub fn is_plaintext_path(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        self.plaintext_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    pub fn wrap_request(&self, path: &str, body: Option<Value>) -> WrappedRequest {
        let context = self
            .handshake
            .context()
            .filter(|_| !self.is_plaintext_path(path));
        let Some(ctx) = context else {
            return WrappedRequest {
                body,
                headers: Vec::new(),
                context: None,
            };
        };

        let headers = vec![(
            CLIENT_PUBLIC_KEY_HEADER.to_string(),
            ctx.client_public_key_b64(),
        )];
        let body = body.map(|plain| match self.seal(&plain, &ctx) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(path, error = %e, "Request encryption failed; sending plaintext");
                plain
            }
        });
        WrappedRequest {
            body,
            headers,
            context: Some(ctx),
        }
    }

    /// Open `body` with the current handshake context.
    pub fn unwrap_response(&self, body: Value) -> Result<Value, CryptoError> {
        self.open(body, self.handshake.context().as_deref())
    }

    /// Open `body` with an explicit context snapshot. Plain bodies pass
    /// through untouched.
    pub fn open(&self, body: Value, ctx: Option<&EncryptionContext>) -> Result<Value, CryptoError> {
        if !is_encrypted(&body) {
            return Ok(body);
        }
        let envelope: EncryptedEnvelope = serde_json::from_value(body)
            .map_err(|e| CryptoError::Encoding(format!("malformed envelope: {e}")))?;
        let ctx = ctx.ok_or(CryptoError::NotReady("handshake context"))?;

        let plaintext = match envelope.scheme {
            Scheme::Box => {
                let payload = EncryptedPayload::try_from(&envelope.payload)?;
                if payload.sender_public_key != ctx.server_key.public_key {
                    return Err(CryptoError::DecryptionFailed(
                        "response not sealed by the server key".into(),
                    ));
                }
                self.engine
                    .decrypt_asymmetric(&payload, Some(&ctx.key_pair))?
            }
            Scheme::Secretbox => {
                let ciphertext = b64_decode(&envelope.payload.ciphertext)?;
                let nonce = b64_decode(&envelope.payload.nonce)?;
                self.engine
                    .decrypt_symmetric(&ciphertext, &nonce, ctx.session_key.as_ref())?
            }
        };

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Encoding(format!("decrypted body is not JSON: {e}")))
    }

    fn seal(&self, body: &Value, ctx: &EncryptionContext) -> Result<Value, CryptoError> {
        let plaintext = serde_json::to_vec(body).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let envelope = if let Some(key) = &ctx.session_key {
            let sealed = self.engine.encrypt_symmetric(&plaintext, Some(key))?;
            EncryptedEnvelope::new(
                WirePayload {
                    ciphertext: b64_encode(&sealed.ciphertext),
                    nonce: b64_encode(&sealed.nonce),
                    public_key: ctx.client_public_key_b64(),
                },
                Scheme::Secretbox,
            )
        } else {
            let payload = self.engine.encrypt_asymmetric(
                &plaintext,
                Some(&ctx.server_key.public_key),
                Some(&ctx.key_pair),
            )?;
            EncryptedEnvelope::new(WirePayload::from(&payload), Scheme::Box)
        };
        serde_json::to_value(envelope).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}
