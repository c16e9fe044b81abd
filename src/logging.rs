//! Tracing subscriber setup shared by both executables.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
