//! `sealwire request`: send one API call through the secure channel and
//! print the decrypted response.

use std::io::{self, Write};

use reqwest::Method;
use serde_json::Value;

use sealwire_core::ClientConfig;

use crate::connection;

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE).
    pub method: String,
    /// Path relative to the API base URL, e.g. `/students/123`.
    pub path: String,
    /// JSON request body. `@file` reads the body from a file.
    #[arg(short, long)]
    pub data: Option<String>,
    /// Print only the `data` member of the response.
    #[arg(long)]
    pub data_only: bool,
}

pub async fn run(args: RequestArgs, config: ClientConfig) -> anyhow::Result<()> {
    let method = parse_method(&args.method)?;
    let body = args.data.as_deref().map(parse_body).transpose()?;

    let (client, _) = connection::connect(config).await?;
    let encrypted = client.should_encrypt(&args.path);
    let response = client.request(method, &args.path, body).await?;

    tracing::debug!(status = response.status, encrypted, "Response received");
    let shown = if args.data_only {
        response.data()
    } else {
        &response.body
    };
    let mut out = io::stdout();
    writeln!(out, "{}", serde_json::to_string_pretty(shown)?)?;
    Ok(())
}

fn parse_method(method: &str) -> anyhow::Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("Invalid HTTP method: {method}"))
}

fn parse_body(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {path}: {e}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("Request body is not JSON: {e}"))
}
