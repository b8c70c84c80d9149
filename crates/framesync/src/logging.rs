//! Subscriber setup for binaries.
//!
//! Libraries in this workspace only emit `tracing` events. An application
//! that wants to see them calls [`init`] once at startup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`].
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

/// Like [`init`], with a caller-chosen fallback filter.
pub fn init_with(fallback: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
