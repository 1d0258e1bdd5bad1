//! Tracing bootstrap for pipeline tools.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// The filter defaults to `info` (or `debug` with `verbose`) and can be
/// overridden through `BAKELINE_LOG`. Safe to call more than once; later
/// calls are no-ops.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("BAKELINE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
