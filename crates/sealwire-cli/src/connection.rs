//! Config resolution and client construction shared by every subcommand.

use std::path::PathBuf;

use tracing::{info, warn};

use sealwire_client::{HandshakeOutcome, SecureClient};
use sealwire_core::ClientConfig;
use sealwire_core::config::load_config;

/// Flags that override the resolved configuration.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// API base URL (overrides settings and `SEALWIRE_BASE_URL`).
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Key store database file.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Skip the handshake and send everything in plaintext.
    #[arg(long, global = true)]
    pub no_encryption: bool,

    /// Negotiate a symmetric session key during the handshake.
    #[arg(long, global = true)]
    pub session_key: bool,

    /// Directory searched for `.sealwire/settings.json`.
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,
}

impl ConnectionOptions {
    /// Apply the CLI layer on top of an already resolved config.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.base_url {
            config.api.base_url.clone_from(url);
        }
        if let Some(path) = &self.db_path {
            config.storage.database_path = Some(path.clone());
        }
        if self.no_encryption {
            config.encryption.enabled = false;
        }
        if self.session_key {
            config.encryption.use_session_key = true;
        }
    }

    /// Defaults, global and project settings, env vars, then these flags.
    pub fn resolve(&self) -> anyhow::Result<ClientConfig> {
        let project_dir = match &self.project_dir {
            Some(dir) => Some(dir.clone()),
            None => std::env::current_dir().ok(),
        };
        let mut config = load_config(project_dir.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// Build a client without touching the network.
pub async fn open(config: ClientConfig) -> anyhow::Result<SecureClient> {
    Ok(SecureClient::builder(config).build().await?)
}

/// Build a client, restore the stored session and run the handshake.
pub async fn connect(config: ClientConfig) -> anyhow::Result<(SecureClient, HandshakeOutcome)> {
    let client = open(config).await?;
    let outcome = client.initialize().await?;
    match &outcome {
        HandshakeOutcome::Encrypted(ctx) => {
            info!(server_key_version = ?ctx.server_key.key_version, "Encrypted session ready");
        }
        HandshakeOutcome::Plaintext(reason) => {
            warn!(reason = %reason, "Continuing without payload encryption");
        }
    }
    Ok((client, outcome))
}
