//! Tracing subscriber setup.
//!
//! Human-readable `fmt` output on stderr, filtered by `GRAG_LOG` when set
//! and by `[logging].level` otherwise. Stdout stays reserved for command
//! output (`grag ask` prints JSON there).

use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV: &str = "GRAG_LOG";

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
