//! Tracing initialization honoring the broker's `debug` flag.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the `debug` construction flag picks
/// between crate-level debug and info. Safe to call once per process;
/// subsequent calls are no-ops.
pub fn init_tracing(debug: bool) {
    let default_filter = if debug { "pairgate=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
