//! Log setup for the `sealwire` binary and for applications that embed
//! `sealwire-client`.
//!
//! `RUST_LOG` wins over the default filter. Output goes to stderr as text,
//! or as one JSON object per line with `log_json`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `default_filter` applies when `RUST_LOG`
/// is unset or unparsable, e.g. `"warn,sealwire_client=info"`. Call once per
/// process.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let output = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry.with(output.json()).init();
    } else {
        registry.with(output).init();
    }
}
