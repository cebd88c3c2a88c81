use tracing_subscriber::EnvFilter;

/// Installs the default tracing subscriber for host programs that do not
/// bring their own. Safe to call more than once; later calls are no-ops.
///
/// The filter is read from `RUST_LOG`, falling back to `warn` for everything
/// and `info` for this crate.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,traza=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
