//! Auth subcommands: login, logout, status.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};

use serde_json::json;

use sealwire_client::HandshakeOutcome;
use sealwire_core::ClientConfig;

use crate::connection;

/// Auth subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum AuthAction {
    /// Log in and store the issued tokens.
    Login {
        /// Username.
        #[arg(short, long)]
        username: String,
        /// Password.
        #[arg(short, long, env = "SEALWIRE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log out, drop tokens and the current handshake.
    Logout,
    /// Show session and encryption status.
    Status,
}

/// Execute an auth subcommand.
pub async fn run(action: AuthAction, config: ClientConfig) -> anyhow::Result<()> {
    match action {
        AuthAction::Login { username, password } => login(config, &username, &password).await,
        AuthAction::Logout => logout(config).await,
        AuthAction::Status => status(config).await,
    }
}

async fn login(config: ClientConfig, username: &str, password: &str) -> anyhow::Result<()> {
    let (client, outcome) = connection::connect(config).await?;
    client
        .login(json!({ "username": username, "password": password }))
        .await
        .map_err(|e| anyhow::anyhow!("Login failed: {e}"))?;

    let mut out = io::stdout();
    writeln!(out, "Logged in as {username}")?;
    writeln!(out, "Encryption: {}", describe(&outcome))?;
    Ok(())
}

async fn logout(config: ClientConfig) -> anyhow::Result<()> {
    let client = connection::open(config).await?;
    if !client.gateway().restore().await? {
        writeln!(io::stdout(), "Not logged in")?;
        return Ok(());
    }
    client.logout().await?;
    writeln!(io::stdout(), "Logged out")?;
    Ok(())
}

async fn status(config: ClientConfig) -> anyhow::Result<()> {
    let base_url = config.api.base_url.clone();
    let client = connection::open(config).await?;
    let restored = client.gateway().restore().await?;
    let keystore = client.keystore();

    let mut out = io::stdout();
    writeln!(out, "API: {base_url}")?;
    if restored {
        writeln!(out, "Session: logged in")?;
    } else {
        writeln!(out, "Session: not logged in")?;
    }
    match keystore.load_key_pair().await {
        Ok(Some(pair)) => writeln!(out, "Client key: {}", pair.fingerprint())?,
        Ok(None) => writeln!(out, "Client key: none (run `sealwire init`)")?,
        Err(e) => writeln!(out, "Client key: unreadable ({e}); run `sealwire keys reset`")?,
    }
    match keystore.load_server_public_key().await? {
        Some(server) => {
            let version = server
                .key_version
                .map_or_else(|| "unversioned".to_string(), |v| format!("v{v}"));
            writeln!(
                out,
                "Server key: {} ({version})",
                sealwire_crypto::fingerprint_of(&server.public_key)
            )?;
        }
        None => writeln!(out, "Server key: none")?,
    }
    let encryption = match keystore.load_encryption_enabled().await? {
        Some(true) => "enabled",
        Some(false) => "declined by server",
        None => "unknown",
    };
    writeln!(out, "Encryption: {encryption}")?;
    Ok(())
}

/// One-line summary of a handshake outcome.
pub fn describe(outcome: &HandshakeOutcome) -> String {
    match outcome {
        HandshakeOutcome::Encrypted(ctx) if ctx.session_key.is_some() => {
            "on (session key)".to_string()
        }
        HandshakeOutcome::Encrypted(_) => "on".to_string(),
        HandshakeOutcome::Plaintext(reason) => format!("off ({reason})"),
    }
}
