use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber. `RUST_LOG` overrides the default
/// `causeway=info,info` filter.
pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("causeway=info,info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|err| Error::Config(format!("failed to initialise tracing subscriber: {err}")))
}
