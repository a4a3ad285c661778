//! Diagnostic tracing for the provisioner.
//!
//! Tracing goes to stderr and is developer/operator diagnostics only; the
//! run report and summary under the state directory are the product output
//! and are written regardless of the filter level. Secrets never appear in
//! tracing output (see `io::credentials`).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// The default level follows the `-v` count (warn, info, debug, trace);
/// `RUST_LOG` overrides it entirely.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
