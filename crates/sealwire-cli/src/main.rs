//! sealwire CLI
//!
//! Talks to an API through the end-to-end encrypted client.

use std::io::{self, Write};

use clap::{Parser, Subcommand};
use tracing::info;

use sealwire_cli::auth_cmd::{self, AuthAction};
use sealwire_cli::connection::{self, ConnectionOptions};
use sealwire_cli::keys_cmd::{self, KeysAction};
use sealwire_cli::request_cmd::{self, RequestArgs};
use sealwire_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "sealwire")]
#[command(version, about = "End-to-end encrypted API client", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionOptions,

    /// Emit JSON log lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate or load the client key pair and run the handshake.
    Init,
    /// Login, logout and session status.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Send a request and print the decrypted response.
    Request(RequestArgs),
    /// Inspect or reset stored key material.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.connection.resolve()?;

    let level = &config.logging.level;
    init_tracing(
        &format!("warn,sealwire_client={level},sealwire_cli={level}"),
        cli.log_json || config.logging.json,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "Starting sealwire CLI");

    match cli.command {
        Command::Init => {
            let (client, outcome) = connection::connect(config).await?;
            let mut out = io::stdout();
            if let Some(pair) = client.keystore().load_key_pair().await? {
                writeln!(out, "Client key: {}", pair.fingerprint())?;
            }
            writeln!(out, "Encryption: {}", auth_cmd::describe(&outcome))?;
        }
        Command::Auth { action } => auth_cmd::run(action, config).await?,
        Command::Request(args) => request_cmd::run(args, config).await?,
        Command::Keys { action } => keys_cmd::run(action, config).await?,
    }
    Ok(())
}
