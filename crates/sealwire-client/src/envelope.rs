//! JSON shapes exchanged with the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sealwire_crypto::WirePayload;

/// Which AEAD sealed an envelope's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// X25519 box addressed to the recipient's public key.
    #[default]
    Box,
    /// Symmetric box under the negotiated session key.
    Secretbox,
}

impl Scheme {
    const fn is_box(&self) -> bool {
        matches!(self, Self::Box)
    }
}

/// `{encrypted: true, payload: {ciphertext, nonce, publicKey}, scheme?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub encrypted: bool,
    pub payload: WirePayload,
    #[serde(default, skip_serializing_if = "Scheme::is_box")]
    pub scheme: Scheme,
}

impl EncryptedEnvelope {
    pub const fn new(payload: WirePayload, scheme: Scheme) -> Self {
        Self {
            encrypted: true,
            payload,
            scheme,
        }
    }
}

/// True iff `body` is an object carrying `encrypted: true`.
pub fn is_encrypted(body: &Value) -> bool {
    body.get("encrypted").and_then(Value::as_bool) == Some(true)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub client_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_session_key: Option<WirePayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub success: bool,
    pub data: Option<HandshakeData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    pub server_public_key: String,
    pub encryption_enabled: bool,
    #[serde(default)]
    pub key_version: Option<u64>,
}

/// Login and refresh responses.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub success: bool,
    pub data: Option<TokenData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Distinguished error codes carried by 401 bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    SessionTerminated,
    InvalidToken,
    NoToken,
    Other(String),
}

impl ErrorCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "SESSION_TERMINATED" => Self::SessionTerminated,
            "INVALID_TOKEN" => Self::InvalidToken,
            "NO_TOKEN" => Self::NoToken,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn from_body(body: &Value) -> Option<Self> {
        raw_error_code(body).map(Self::parse)
    }
}

/// Error code from an error body. Accepts both `{code}` and
/// `{error: {code}}`.
pub fn raw_error_code(body: &Value) -> Option<&str> {
    body.get("code")
        .or_else(|| body.get("error").and_then(|e| e.get("code")))
        .and_then(Value::as_str)
}

/// Human-readable message from an error body, if any.
pub fn error_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("error").and_then(|e| e.get("message")))
        .and_then(Value::as_str)
        .map(str::to_string)
}
