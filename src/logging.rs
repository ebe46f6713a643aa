//! Tracing subscriber setup for binaries and tests embedding this crate.

use tracing_subscriber::{fmt, EnvFilter};

/// Default directive when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place and return `false`.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
