//! Log subscriber setup for binaries embedding the session crates.

use tracing_subscriber::EnvFilter;

use crate::error::SessionError;

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "sv_session=info,sv_store=info,sv_proto=info";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_DIRECTIVES`]. Fails if a global subscriber is already set.
pub fn init_tracing() -> Result<(), SessionError> {
    init_tracing_with(DEFAULT_DIRECTIVES)
}

pub fn init_tracing_with(default_directives: &str) -> Result<(), SessionError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives.into()),
        )
        .try_init()
        .map_err(|e| SessionError::Config(format!("tracing: {e}")))
}
