use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CAPGATE_LOG";

/// Install the stderr subscriber. Stdout is reserved for command output.
///
/// Filter comes from `CAPGATE_LOG` (e.g. `capgate=debug`), defaulting to `warn`. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}
