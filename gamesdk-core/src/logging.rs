//! Logging setup for binaries and demos embedding the dispatcher.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_directive` when it is set. Fails if a
/// global subscriber is already installed.
pub fn init_logging(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {}", err))
}
