//! Observability helpers: tracing-subscriber setup and prometheus metric
//! constructors shared by the other crates.

use tracing_subscriber::EnvFilter;

pub mod metrics;
pub mod testonly;

/// Default filter applied when `RUST_LOG` is not set.
pub const DEFAULT_RUST_LOG: &str = "ustore=info";

/// Installs the global tracing subscriber.
///
/// Reads the filter from `RUST_LOG`, falling back to [`DEFAULT_RUST_LOG`].
/// Call once at process start; a second call is a no-op (the subscriber
/// cannot be replaced).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_RUST_LOG));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
