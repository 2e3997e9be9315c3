//! Opt-in `tracing-subscriber` initializer for binaries that embed the
//! engine. The engine itself only emits `tracing` spans/events; it never
//! initializes a global subscriber, since a library must not assume it owns
//! the process's logging configuration.

use tracing_subscriber::EnvFilter;

/// Initialize a `tracing-subscriber` formatter reading its filter from
/// `RUST_LOG` (falling back to `conductor=info`), with optional JSON
/// output for structured log aggregation.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conductor=info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
