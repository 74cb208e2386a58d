//! Scripted in-process API server used by the client tests.
//!
//! Speaks the same wire formats as the real server: it answers the
//! handshake, decrypts encrypted request envelopes, encrypts responses for
//! callers that send `X-Client-Public-Key`, issues and rotates tokens, and
//! can be switched into the failure modes the tests need.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use sealwire_crypto::{
    EncryptedPayload, KeyPair, PublicKeyBytes, SessionKey, WirePayload, b64_decode, b64_encode,
    decode_public_key, sealed, secretbox,
};

use crate::envelope::{EncryptedEnvelope, Scheme, is_encrypted};
use crate::error::TransportError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub const HANDSHAKE: &str = "/e2ee/handshake";
pub const SESSION_KEY: &str = "/e2ee/handshake/session-key";
pub const LOGIN: &str = "/auth/login";
pub const REFRESH: &str = "/auth/refresh-token";
pub const LOGOUT: &str = "/auth/logout";
pub const PUSH_REGISTER: &str = "/notifications/register-device";

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub client_key_header: Option<String>,
    pub authorization: Option<String>,
    pub raw_body: Option<Value>,
    pub body_was_encrypted: bool,
    pub plaintext_body: Option<Value>,
}

pub struct FakeServer {
    keys: Mutex<KeyPair>,
    key_version: AtomicU64,
    session_key: Mutex<Option<SessionKey>>,
    handshake_delay: Mutex<Option<Duration>>,
    refresh_delay: Mutex<Option<Duration>>,
    access_token: Mutex<String>,
    refresh_token: Mutex<String>,
    issued: AtomicU64,
    requests: Mutex<Vec<Recorded>>,

    pub handshake_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub encryption_enabled: AtomicBool,
    pub fail_handshake: AtomicBool,
    pub reject_session_key: AtomicBool,
    /// Refresh answers 400.
    pub refresh_fails: AtomicBool,
    /// Every authenticated request answers `SESSION_TERMINATED`.
    pub terminated: AtomicBool,
    /// The refresh call answers `SESSION_TERMINATED`.
    pub terminate_on_refresh: AtomicBool,
    /// Every authenticated request answers `INVALID_TOKEN`.
    pub invalid_token: AtomicBool,
    /// Every authenticated request answers a plain 401, even after refresh.
    pub reject_all_tokens: AtomicBool,
    /// Responses are sealed under a foreign key pair.
    pub forge_responses: AtomicBool,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            keys: Mutex::new(KeyPair::generate().unwrap()),
            key_version: AtomicU64::new(1),
            session_key: Mutex::new(None),
            handshake_delay: Mutex::new(None),
            refresh_delay: Mutex::new(None),
            access_token: Mutex::new("access-0".into()),
            refresh_token: Mutex::new("refresh-0".into()),
            issued: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
            handshake_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            encryption_enabled: AtomicBool::new(true),
            fail_handshake: AtomicBool::new(false),
            reject_session_key: AtomicBool::new(false),
            refresh_fails: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            terminate_on_refresh: AtomicBool::new(false),
            invalid_token: AtomicBool::new(false),
            reject_all_tokens: AtomicBool::new(false),
            forge_responses: AtomicBool::new(false),
        })
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.keys.lock().public_bytes()
    }

    pub fn rotate_keys(&self) {
        *self.keys.lock() = KeyPair::generate().unwrap();
        self.key_version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_key(&self) -> Option<SessionKey> {
        self.session_key.lock().clone()
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        *self.handshake_delay.lock() = Some(delay);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = Some(delay);
    }

    /// Expire the current access token without telling the client.
    pub fn expire_access_token(&self) {
        *self.access_token.lock() = "expired-by-server".into();
    }

    pub fn access_token(&self) -> String {
        self.access_token.lock().clone()
    }

    pub fn refresh_token(&self) -> String {
        self.refresh_token.lock().clone()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    fn issue_tokens(&self) -> HttpResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        *self.access_token.lock() = access.clone();
        *self.refresh_token.lock() = refresh.clone();
        HttpResponse::new(
            200,
            json!({"success": true, "data": {"accessToken": access, "refreshToken": refresh}}),
        )
    }

    fn open_body(&self, body: &Value) -> Value {
        let envelope: EncryptedEnvelope = serde_json::from_value(body.clone()).unwrap();
        let plaintext = match envelope.scheme {
            Scheme::Box => {
                let payload = EncryptedPayload::try_from(&envelope.payload).unwrap();
                sealed::open(&payload, &self.keys.lock()).unwrap()
            }
            Scheme::Secretbox => {
                let key = self.session_key().expect("secretbox without session key");
                secretbox::open(
                    &b64_decode(&envelope.payload.ciphertext).unwrap(),
                    &b64_decode(&envelope.payload.nonce).unwrap(),
                    &key,
                )
                .unwrap()
            }
        };
        serde_json::from_slice(&plaintext).unwrap()
    }

    fn seal_for(&self, client_key_b64: &str, body: &Value) -> Value {
        let plaintext = serde_json::to_vec(body).unwrap();
        let server_pub = b64_encode(&self.public_key());
        if let Some(key) = self.session_key() {
            let sealed = secretbox::seal(&plaintext, &key).unwrap();
            let wire = WirePayload {
                ciphertext: b64_encode(&sealed.ciphertext),
                nonce: b64_encode(&sealed.nonce),
                public_key: server_pub,
            };
            return serde_json::to_value(EncryptedEnvelope::new(wire, Scheme::Secretbox)).unwrap();
        }
        let client_pub = decode_public_key(client_key_b64).unwrap();
        let sender = if self.forge_responses.load(Ordering::SeqCst) {
            KeyPair::generate().unwrap()
        } else {
            self.keys.lock().clone()
        };
        let payload = sealed::seal(&plaintext, &client_pub, &sender).unwrap();
        serde_json::to_value(EncryptedEnvelope::new(
            WirePayload::from(&payload),
            Scheme::Box,
        ))
        .unwrap()
    }

    fn unauthorized(code: Option<&str>) -> HttpResponse {
        let body = code.map_or_else(
            || json!({"success": false, "message": "Unauthorized"}),
            |c| json!({"success": false, "code": c, "message": c}),
        );
        HttpResponse::new(401, body)
    }

    async fn route(&self, request: &HttpRequest, body: Option<Value>) -> HttpResponse {
        match request.path.as_str() {
            HANDSHAKE => {
                self.handshake_calls.fetch_add(1, Ordering::SeqCst);
                HttpResponse::new(
                    200,
                    json!({
                        "success": true,
                        "data": {
                            "serverPublicKey": b64_encode(&self.public_key()),
                            "encryptionEnabled": self.encryption_enabled.load(Ordering::SeqCst),
                            "keyVersion": self.key_version.load(Ordering::SeqCst),
                        }
                    }),
                )
            }
            SESSION_KEY => {
                if self.reject_session_key.load(Ordering::SeqCst) {
                    return HttpResponse::new(400, json!({"success": false}));
                }
                let body = body.unwrap();
                let wire: WirePayload =
                    serde_json::from_value(body["encryptedSessionKey"].clone()).unwrap();
                let payload = EncryptedPayload::try_from(&wire).unwrap();
                let raw = sealed::open(&payload, &self.keys.lock()).unwrap();
                *self.session_key.lock() = Some(SessionKey::from_bytes(&raw).unwrap());
                HttpResponse::new(200, json!({"success": true}))
            }
            LOGIN => {
                let body = body.unwrap_or(Value::Null);
                if body["password"] == json!("wrong") {
                    return HttpResponse::new(
                        400,
                        json!({"success": false, "code": "BAD_CREDENTIALS", "message": "Invalid credentials"}),
                    );
                }
                self.issue_tokens()
            }
            REFRESH => {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let delay = *self.refresh_delay.lock();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if self.terminate_on_refresh.load(Ordering::SeqCst) {
                    return Self::unauthorized(Some("SESSION_TERMINATED"));
                }
                if self.refresh_fails.load(Ordering::SeqCst) {
                    return HttpResponse::new(400, json!({"success": false, "message": "refresh rejected"}));
                }
                let presented = body.as_ref().and_then(|b| b["refreshToken"].as_str().map(str::to_string));
                if presented.as_deref() != Some(self.refresh_token().as_str()) {
                    return HttpResponse::new(401, json!({"success": false, "code": "INVALID_REFRESH_TOKEN"}));
                }
                self.issue_tokens()
            }
            LOGOUT => {
                self.logout_calls.fetch_add(1, Ordering::SeqCst);
                HttpResponse::new(200, json!({"success": true}))
            }
            path => {
                if path.starts_with("/public") {
                    return HttpResponse::new(200, json!({"success": true, "data": {"path": path}}));
                }
                if self.terminated.load(Ordering::SeqCst) {
                    return Self::unauthorized(Some("SESSION_TERMINATED"));
                }
                if self.invalid_token.load(Ordering::SeqCst) {
                    return Self::unauthorized(Some("INVALID_TOKEN"));
                }
                let expected = format!("Bearer {}", self.access_token());
                if self.reject_all_tokens.load(Ordering::SeqCst)
                    || request.header("authorization") != Some(expected.as_str())
                {
                    return Self::unauthorized(Some("TOKEN_EXPIRED"));
                }
                HttpResponse::new(
                    200,
                    json!({
                        "success": true,
                        "data": {"path": path, "method": request.method.as_str(), "echo": body}
                    }),
                )
            }
        }
    }
}

#[async_trait]
impl HttpTransport for FakeServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.path == HANDSHAKE {
            let delay = *self.handshake_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_handshake.load(Ordering::SeqCst) {
                return Err(TransportError::Network("connection refused".into()));
            }
        }

        let path = request.path.split('?').next().unwrap_or_default().to_string();
        let raw_body = request.body.clone();
        let encrypted = raw_body.as_ref().is_some_and(is_encrypted);
        let plaintext_body = raw_body
            .as_ref()
            .map(|b| if encrypted { self.open_body(b) } else { b.clone() });
        let client_key_header = request.header("x-client-public-key").map(str::to_string);
        self.requests.lock().push(Recorded {
            path: path.clone(),
            client_key_header: client_key_header.clone(),
            authorization: request.header("authorization").map(str::to_string),
            raw_body,
            body_was_encrypted: encrypted,
            plaintext_body: plaintext_body.clone(),
        });

        let routed = HttpRequest {
            path,
            ..request
        };
        let mut response = self.route(&routed, plaintext_body).await;
        if let Some(key) = client_key_header.filter(|_| response.is_success()) {
            response.body = self.seal_for(&key, &response.body);
        }
        Ok(response)
    }
}
