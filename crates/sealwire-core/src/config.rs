//! Configuration resolution for sealwire clients.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/sealwire/settings.json)
//! 3. Project config (.sealwire/settings.json)
//! 4. Environment variables (`SEALWIRE_*`)
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub auth: AuthEndpoints,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the API lives and how long calls may take.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,
    /// Timeout for ordinary API requests (seconds).
    pub request_timeout_secs: u64,
    /// Timeout for the key-exchange call (seconds). Longer than the request
    /// timeout: a failed handshake switches the session to plaintext.
    pub handshake_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/api".to_string(),
            request_timeout_secs: 30,
            handshake_timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// End-to-end encryption settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Master switch. When `false` no handshake is attempted.
    pub enabled: bool,
    /// Unencrypted endpoint used for the key exchange.
    pub handshake_path: String,
    /// Path prefixes that are always sent and received in plaintext
    /// (the handshake itself, payment SDK callbacks, ...).
    pub plaintext_paths: Vec<String>,
    /// Negotiate a symmetric session key during the handshake.
    pub use_session_key: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            handshake_path: "/e2ee/handshake".to_string(),
            plaintext_paths: vec![
                "/e2ee/handshake".to_string(),
                "/payments".to_string(),
                "/subscriptions".to_string(),
            ],
            use_session_key: false,
        }
    }
}

/// Authentication endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    /// Where the push device token is registered after login.
    pub push_register_path: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh-token".to_string(),
            logout_path: "/auth/logout".to_string(),
            push_register_path: "/notifications/register-device".to_string(),
        }
    }
}

/// Persistent key/value storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// `SQLite` file backing the key store. `None` resolves to
    /// [`database_path`].
    pub database_path: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ClientConfig {
    /// Check invariants the rest of the client relies on.
    pub fn validate(&self) -> Result<()> {
        let url = self.api.base_url.trim();
        if url.is_empty() {
            return Err(Error::Config("api.base_url is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "api.base_url must start with http:// or https://, got {url}"
            )));
        }
        if self.api.request_timeout_secs == 0 || self.api.handshake_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        for (name, path) in [
            ("encryption.handshake_path", &self.encryption.handshake_path),
            ("auth.login_path", &self.auth.login_path),
            ("auth.refresh_path", &self.auth.refresh_path),
            ("auth.logout_path", &self.auth.logout_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("{name} must start with '/'")));
            }
        }
        Ok(())
    }

    /// Resolved database path: explicit setting, else the platform default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.storage.database_path.clone().or_else(database_path)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<ClientConfig> {
    let mut config = ClientConfig::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".sealwire").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_root().map(|p| p.join("settings.json"))
}

/// Get the default key store database path.
pub fn database_path() -> Option<PathBuf> {
    config_root().map(|p| p.join("keystore.db"))
}

fn config_root() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".sealwire"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/sealwire"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("sealwire"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<ClientConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut ClientConfig, overlay: ClientConfig) {
    base.api = overlay.api;
    base.encryption = overlay.encryption;
    base.auth = overlay.auth;
    base.logging = overlay.logging;

    if overlay.storage.database_path.is_some() {
        base.storage.database_path = overlay.storage.database_path;
    }
}

/// Apply `SEALWIRE_*` overrides read through `lookup`.
///
/// Unparseable values are ignored and the previous layer wins.
pub fn apply_env_overrides<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("SEALWIRE_BASE_URL") {
        config.api.base_url = val;
    }
    if let Some(n) = lookup("SEALWIRE_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.api.request_timeout_secs = n;
    }
    if let Some(n) = lookup("SEALWIRE_HANDSHAKE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.api.handshake_timeout_secs = n;
    }
    if let Some(b) = lookup("SEALWIRE_ENCRYPTION").and_then(|v| parse_bool(&v)) {
        config.encryption.enabled = b;
    }
    if let Some(b) = lookup("SEALWIRE_SESSION_KEY").and_then(|v| parse_bool(&v)) {
        config.encryption.use_session_key = b;
    }
    if let Some(val) = lookup("SEALWIRE_DB_PATH") {
        config.storage.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("SEALWIRE_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(b) = lookup("SEALWIRE_LOG_JSON").and_then(|v| parse_bool(&v)) {
        config.logging.json = b;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
