//! Key subcommands: show, reset.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};

use sealwire_core::ClientConfig;

use crate::connection;

#[derive(clap::Subcommand, Debug)]
pub enum KeysAction {
    /// Print the client public key.
    Show,
    /// Delete every stored key. The next command performs a fresh handshake.
    Reset,
}

pub async fn run(action: KeysAction, config: ClientConfig) -> anyhow::Result<()> {
    let client = connection::open(config).await?;
    let mut out = io::stdout();
    match action {
        KeysAction::Show => match client.keystore().load_key_pair().await? {
            Some(pair) => {
                writeln!(out, "{}", sealwire_crypto::b64_encode(&pair.public_bytes()))?;
                writeln!(out, "Fingerprint: {}", pair.fingerprint())?;
            }
            None => writeln!(out, "No key pair yet (run `sealwire init`)")?,
        },
        KeysAction::Reset => {
            client.reset_keys().await?;
            writeln!(out, "Key material removed")?;
        }
    }
    Ok(())
}
