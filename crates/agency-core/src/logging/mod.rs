//! `tracing` subscriber setup.
//!
//! Library code only emits events through the `tracing` macros; installing a
//! subscriber is the embedding application's choice. These helpers cover the
//! two common shapes (human-readable and JSON lines), both on stderr, and
//! [`test_utils`] gives tests a thread-local capture.

pub mod test_utils;

pub use test_utils::{CapturedLogs, LogRecord, capture_logs};

use tracing_subscriber::EnvFilter;

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a compact, human-readable subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `level`. Only the first call in a
/// process has any effect.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Install a JSON-lines subscriber on stderr.
///
/// Same precedence and idempotence rules as [`init_subscriber`].
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .flatten_event(true);

    let _ = subscriber.try_init();
}
