//! Tracing subscriber setup for the `isync` binary.

use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV: &str = "ISYNC_LOG";

/// Install a stderr fmt subscriber.
///
/// Filter precedence: `ISYNC_LOG`, then `level`, then `info`. Calling this
/// more than once is harmless; later calls keep the first subscriber.
pub fn init(level: Option<&str>) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
