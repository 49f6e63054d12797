//! Tracing initialization for binaries/tests (SPEC_FULL §10.1).
//!
//! `RUST_LOG`-driven `EnvFilter`, defaulting to `info`, matching the
//! teacher's own `tracing-subscriber` setup style used across its
//! binaries.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing_subscriber::fmt` subscriber reading its
/// filter from `RUST_LOG` (falling back to `info`). Safe to call more than
/// once in a process with multiple test binaries; a second call is a
/// harmless no-op since `try_init` ignores an `AlreadySet` error.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
