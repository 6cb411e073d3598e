use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber used by the `kernjit` binary.
///
/// The filter comes from `KERNJIT_LOG`, then `RUST_LOG`, then defaults to
/// `warn`. Calling this more than once is harmless.
pub fn init_logging() {
    let filter = std::env::var("KERNJIT_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
