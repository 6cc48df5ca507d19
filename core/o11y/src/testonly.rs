//! Test-only logging helpers.

use tracing_subscriber::EnvFilter;

/// Installs a subscriber printing to the test writer so `cargo test`
/// captures output per test. Safe to call from every test; only the first
/// call installs.
pub fn init_test_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
